//! Worker-backed device handle
//!
//! [`BridgedDevice`] implements [`UsbDevice`] by forwarding each call to the
//! USB worker thread over the channel bridge.

use async_trait::async_trait;
use common::{ConfigurationInfo, DeviceInfo, UsbBridge, UsbCommand, UsbDevice};
use protocol::{ControlSetup, DeviceKey, UsbError};
use std::time::Duration;

use crate::usb::transfers::ENDPOINT_IN;

pub struct BridgedDevice {
    bridge: UsbBridge,
    key: DeviceKey,
    info: DeviceInfo,
    /// Timeout libusb applies to each transfer
    transfer_timeout: Duration,
}

impl BridgedDevice {
    pub fn new(
        bridge: UsbBridge,
        key: DeviceKey,
        info: DeviceInfo,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            bridge,
            key,
            info,
            transfer_timeout,
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }
}

#[async_trait]
impl UsbDevice for BridgedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    async fn open(&self) -> Result<(), UsbError> {
        let key = self.key;
        self.bridge
            .request(|response| UsbCommand::Open { key, response })
            .await
    }

    async fn close(&self) -> Result<(), UsbError> {
        let key = self.key;
        self.bridge
            .request(|response| UsbCommand::Close { key, response })
            .await
    }

    async fn configuration(&self) -> Result<Option<ConfigurationInfo>, UsbError> {
        let key = self.key;
        self.bridge
            .request(|response| UsbCommand::ActiveConfiguration { key, response })
            .await
    }

    async fn select_configuration(&self, value: u8) -> Result<(), UsbError> {
        let key = self.key;
        self.bridge
            .request(|response| UsbCommand::SelectConfiguration {
                key,
                value,
                response,
            })
            .await
    }

    async fn select_alternate_interface(
        &self,
        interface: u8,
        alternate: u8,
    ) -> Result<(), UsbError> {
        let key = self.key;
        self.bridge
            .request(|response| UsbCommand::SelectAlternate {
                key,
                interface,
                alternate,
                response,
            })
            .await
    }

    async fn claim_interface(&self, interface: u8) -> Result<(), UsbError> {
        let key = self.key;
        self.bridge
            .request(|response| UsbCommand::ClaimInterface {
                key,
                interface,
                response,
            })
            .await
    }

    async fn control_transfer_out(
        &self,
        setup: &ControlSetup,
        data: &[u8],
    ) -> Result<usize, UsbError> {
        let key = self.key;
        let timeout = self.transfer_timeout;
        self.bridge
            .request(|response| UsbCommand::ControlOut {
                key,
                setup: setup.clone(),
                data: data.to_vec(),
                timeout,
                response,
            })
            .await
    }

    async fn transfer_out(&self, endpoint_number: u8, data: &[u8]) -> Result<usize, UsbError> {
        let key = self.key;
        let timeout = self.transfer_timeout;
        self.bridge
            .request(|response| UsbCommand::BulkOut {
                key,
                endpoint: endpoint_number & !ENDPOINT_IN,
                data: data.to_vec(),
                timeout,
                response,
            })
            .await
    }

    async fn transfer_in(&self, endpoint_number: u8, length: usize) -> Result<Vec<u8>, UsbError> {
        let key = self.key;
        let timeout = self.transfer_timeout;
        self.bridge
            .request(|response| UsbCommand::BulkIn {
                key,
                endpoint: endpoint_number | ENDPOINT_IN,
                length,
                timeout,
                response,
            })
            .await
    }
}
