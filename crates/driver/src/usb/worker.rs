//! USB worker thread
//!
//! Dedicated thread for handling USB events and transfers. Owns the libusb
//! context and every open handle, runs the `handle_events` loop, and answers
//! commands from the Tokio runtime.

use crate::usb::device::RawDevice;
use crate::usb::manager::DeviceManager;
use crate::usb::transfers::{self, ENDPOINT_IN, map_rusb_error};
use common::{UsbCommand, UsbWorker};
use protocol::{DeviceKey, UsbError};
use rusb::UsbContext;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// USB worker thread
pub struct UsbWorkerThread {
    manager: DeviceManager,
    worker: UsbWorker,
}

impl UsbWorkerThread {
    pub fn new(worker: UsbWorker, allowed_filters: Vec<String>) -> Result<Self, rusb::Error> {
        let mut manager = DeviceManager::new(allowed_filters)?;
        manager.refresh()?;

        Ok(Self { manager, worker })
    }

    /// Run the USB worker thread event loop
    ///
    /// Alternates between draining one pending command and pumping libusb
    /// events with a short timeout, until a Shutdown command arrives.
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            match self.worker.try_recv_command() {
                Some(UsbCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(cmd) => self.handle_command(cmd),
                None => {}
            }

            let timeout = Duration::from_millis(100);
            match self.manager.context().handle_events(Some(timeout)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        info!("USB worker thread stopped");
        Ok(())
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: UsbCommand) {
        // Keep the USB thread alive if a handler panics
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::ListDevices { response } => {
                let devices = self.manager.list_devices();
                debug!("Listing {} devices", devices.len());
                let _ = response.send(devices);
            }

            UsbCommand::Open { key, response } => {
                let _ = response.send(self.with_device(key, |d| d.open()));
            }

            UsbCommand::Close { key, response } => {
                let _ = response.send(self.with_device(key, |d| {
                    d.close();
                    Ok(())
                }));
            }

            UsbCommand::ActiveConfiguration { key, response } => {
                let _ = response.send(self.with_device(key, |d| d.configuration()));
            }

            UsbCommand::SelectConfiguration {
                key,
                value,
                response,
            } => {
                debug!("Selecting configuration {} on {}", value, key);
                let _ = response.send(self.with_device(key, |d| d.select_configuration(value)));
            }

            UsbCommand::SelectAlternate {
                key,
                interface,
                alternate,
                response,
            } => {
                let _ = response.send(
                    self.with_device(key, |d| d.select_alternate(interface, alternate)),
                );
            }

            UsbCommand::ClaimInterface {
                key,
                interface,
                response,
            } => {
                let _ = response.send(self.with_device(key, |d| d.claim_interface(interface)));
            }

            UsbCommand::ControlOut {
                key,
                setup,
                data,
                timeout,
                response,
            } => {
                let result = self.with_open(key, |handle| {
                    transfers::control_out(handle, &setup, &data, timeout)
                });
                let _ = response.send(result);
            }

            UsbCommand::BulkOut {
                key,
                endpoint,
                data,
                timeout,
                response,
            } => {
                let result = self.with_open(key, |handle| {
                    transfers::bulk_out(handle, endpoint & !ENDPOINT_IN, &data, timeout)
                });
                let _ = response.send(result);
            }

            UsbCommand::BulkIn {
                key,
                endpoint,
                length,
                timeout,
                response,
            } => {
                let result = self.with_open(key, |handle| {
                    transfers::bulk_in(handle, endpoint | ENDPOINT_IN, length, timeout)
                });
                let _ = response.send(result);
            }

            UsbCommand::Shutdown => {
                // Handled in the main loop
            }
        }
    }

    /// Run a device operation, mapping a missing device to `NoDevice`
    fn with_device<T>(
        &mut self,
        key: DeviceKey,
        op: impl FnOnce(&mut RawDevice) -> Result<T, rusb::Error>,
    ) -> Result<T, UsbError> {
        let device = self.manager.device_mut(key).ok_or_else(|| {
            warn!("Device {} not found", key);
            UsbError::NoDevice
        })?;
        op(device).map_err(map_rusb_error)
    }

    /// Run a transfer on an open handle
    fn with_open<T>(
        &mut self,
        key: DeviceKey,
        op: impl FnOnce(&rusb::DeviceHandle<rusb::Context>) -> Result<T, UsbError>,
    ) -> Result<T, UsbError> {
        let device = self.manager.device_mut(key).ok_or(UsbError::NoDevice)?;
        let handle = device.handle().map_err(|_| {
            warn!("Device {} not open for transfer", key);
            UsbError::NotFound
        })?;
        op(handle)
    }
}

/// Spawn the USB worker thread
///
/// The thread runs until a Shutdown command is received or libusb fails to
/// initialize.
pub fn spawn_usb_worker(
    worker: UsbWorker,
    filters: Vec<String>,
) -> std::io::Result<std::thread::JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = UsbWorkerThread::new(worker, filters)?;
            worker_thread.run()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_usb_bridge;

    #[test]
    fn test_usb_worker_creation() {
        let (_bridge, worker) = create_usb_bridge();

        // USB context creation may fail without permissions
        if let Err(e) = UsbWorkerThread::new(worker, vec![]) {
            eprintln!(
                "USB worker creation failed (expected without permissions): {}",
                e
            );
        }
    }
}
