//! Async channel bridge between Tokio runtime and USB thread
//!
//! libusb calls block, so every device operation is shipped to a dedicated
//! worker thread as a [`UsbCommand`] and answered on a oneshot channel.

use crate::usb_types::{ConfigurationInfo, DeviceInfo};
use async_channel::{Receiver, Sender, bounded};
use protocol::{ControlSetup, DeviceKey, UsbError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Reply channel for a command
pub type Reply<T> = oneshot::Sender<Result<T, UsbError>>;

/// A device seen during enumeration
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub key: DeviceKey,
    pub info: DeviceInfo,
    pub configuration: Option<ConfigurationInfo>,
}

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// List all connected USB devices
    ListDevices {
        response: oneshot::Sender<Vec<DiscoveredDevice>>,
    },

    /// Open a device handle
    Open { key: DeviceKey, response: Reply<()> },

    /// Release claimed interfaces and drop the handle
    Close { key: DeviceKey, response: Reply<()> },

    /// Read the active configuration descriptor
    ActiveConfiguration {
        key: DeviceKey,
        response: Reply<Option<ConfigurationInfo>>,
    },

    SelectConfiguration {
        key: DeviceKey,
        value: u8,
        response: Reply<()>,
    },

    SelectAlternate {
        key: DeviceKey,
        interface: u8,
        alternate: u8,
        response: Reply<()>,
    },

    ClaimInterface {
        key: DeviceKey,
        interface: u8,
        response: Reply<()>,
    },

    /// Host-to-device control transfer
    ControlOut {
        key: DeviceKey,
        setup: ControlSetup,
        data: Vec<u8>,
        timeout: Duration,
        response: Reply<usize>,
    },

    /// Bulk OUT transfer (endpoint address, direction bit clear)
    BulkOut {
        key: DeviceKey,
        endpoint: u8,
        data: Vec<u8>,
        timeout: Duration,
        response: Reply<usize>,
    },

    /// Bulk IN transfer (endpoint address, direction bit set)
    BulkIn {
        key: DeviceKey,
        endpoint: u8,
        length: usize,
        timeout: Duration,
        response: Reply<Vec<u8>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a command built around a fresh reply channel and await the answer
    pub async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> UsbCommand,
    ) -> Result<T, UsbError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx))
            .await
            .map_err(|e| UsbError::Other {
                message: e.to_string(),
            })?;
        rx.await.map_err(|_| UsbError::Other {
            message: "USB worker dropped the request".to_string(),
        })?
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<UsbCommand>,
}

impl UsbWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);

    (UsbBridge { cmd_tx }, UsbWorker { cmd_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_usb_bridge();

        // Spawn a thread to simulate USB worker
        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            matches!(cmd, UsbCommand::ListDevices { .. })
        });

        let (tx, _rx) = oneshot::channel();
        bridge
            .send_command(UsbCommand::ListDevices { response: tx })
            .await
            .unwrap();

        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let (bridge, worker) = create_usb_bridge();

        let handle = std::thread::spawn(move || match worker.recv_command().unwrap() {
            UsbCommand::ClaimInterface {
                interface,
                response,
                ..
            } => {
                let _ = response.send(if interface == 0 {
                    Ok(())
                } else {
                    Err(UsbError::Busy)
                });
            }
            other => panic!("unexpected command {:?}", other),
        });

        let key = DeviceKey { bus: 1, address: 4 };
        let result = bridge
            .request(|response| UsbCommand::ClaimInterface {
                key,
                interface: 3,
                response,
            })
            .await;

        assert_eq!(result, Err(UsbError::Busy));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_request_worker_gone() {
        let (bridge, worker) = create_usb_bridge();
        drop(worker);

        let key = DeviceKey { bus: 1, address: 4 };
        let result = bridge
            .request(|response| UsbCommand::Open { key, response })
            .await;

        assert!(matches!(result, Err(UsbError::Other { .. })));
    }
}
