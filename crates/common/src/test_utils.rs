//! Test utilities for scan-driver
//!
//! Provides a scriptable [`MockDevice`] and helper functions for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockDevice, create_mock_device_info, vendor_interface};
//! use common::usb_types::UsbDevice;
//!
//! # fn main() {
//! let device = MockDevice::new(create_mock_device_info(0x04a9, 0x1234))
//!     .with_interfaces(vec![vendor_interface(0, &[(2, true)])]);
//! assert_eq!(device.info().vendor_id, 0x04a9);
//! # }
//! ```

use crate::usb_types::{AlternateInfo, ConfigurationInfo, DeviceInfo, InterfaceInfo, UsbDevice};
use async_trait::async_trait;
use parking_lot::Mutex;
use protocol::{ControlSetup, Direction, Endpoint, EndpointType, UsbError};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceInfo for testing
///
/// The serial number is derived from the vendor/product pair.
pub fn create_mock_device_info(vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        vendor_id,
        product_id,
        serial_number: Some(format!("SN{:04x}{:04x}", vendor_id, product_id)),
        manufacturer: Some("Test Manufacturer".to_string()),
        product: Some("Test Scanner".to_string()),
        class: 0x00,
    }
}

/// Interface with a single vendor-specific alternate setting
///
/// `endpoints` lists `(number, is_in)` pairs, all bulk.
pub fn vendor_interface(number: u8, endpoints: &[(u8, bool)]) -> InterfaceInfo {
    class_interface(number, 0xFF, endpoints)
}

/// Interface with a single alternate setting of the given class
pub fn class_interface(number: u8, class_code: u8, endpoints: &[(u8, bool)]) -> InterfaceInfo {
    InterfaceInfo {
        number,
        alternates: vec![AlternateInfo {
            setting: 0,
            class_code,
            subclass_code: 0,
            protocol_code: 0,
            endpoints: endpoints
                .iter()
                .map(|&(n, is_in)| {
                    let direction = if is_in { Direction::In } else { Direction::Out };
                    Endpoint::new(n, direction, EndpointType::Bulk)
                })
                .collect(),
        }],
    }
}

/// Create a buffer that sniffs as JPEG
pub fn create_mock_jpeg(size: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
    if size >= 2 {
        data[0] = 0xFF;
        data[1] = 0xD8;
    }
    data
}

/// Operation recorded by [`MockDevice`], in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    Open,
    Close,
    SelectConfiguration(u8),
    SelectAlternate { interface: u8, alternate: u8 },
    ClaimInterface(u8),
    ControlOut { request: u8, value: u16, index: u16, data: Vec<u8> },
    BulkOut { endpoint: u8, data: Vec<u8> },
    BulkIn { endpoint: u8, length: usize },
}

#[derive(Default)]
struct Failures {
    open: Option<UsbError>,
    select_configuration: Option<UsbError>,
    claim: Option<UsbError>,
    /// (zero-based control transfer index, error)
    control_at: Option<(usize, UsbError)>,
    bulk_out: Option<UsbError>,
    bulk_in: Option<UsbError>,
}

struct MockState {
    ops: Vec<MockOp>,
    active: Option<ConfigurationInfo>,
    control_count: usize,
    bulk_in: VecDeque<Vec<u8>>,
    open: bool,
}

/// Scriptable in-memory device
///
/// Starts unconfigured; `select_configuration` installs the descriptor tree
/// set with [`MockDevice::with_interfaces`]. Bulk-in reads pop queued
/// payloads and return an empty buffer once the queue runs dry.
pub struct MockDevice {
    info: DeviceInfo,
    descriptor: ConfigurationInfo,
    failures: Failures,
    open_gate: Mutex<Option<Arc<Notify>>>,
    bulk_in_gate: Option<Arc<Notify>>,
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            descriptor: ConfigurationInfo {
                value: 1,
                interfaces: Vec::new(),
            },
            failures: Failures::default(),
            open_gate: Mutex::new(None),
            bulk_in_gate: None,
            state: Mutex::new(MockState {
                ops: Vec::new(),
                active: None,
                control_count: 0,
                bulk_in: VecDeque::new(),
                open: false,
            }),
        }
    }

    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceInfo>) -> Self {
        self.descriptor.interfaces = interfaces;
        self
    }

    /// Report the configuration as already selected
    pub fn configured(self) -> Self {
        self.state.lock().active = Some(self.descriptor.clone());
        self
    }

    pub fn failing_open(mut self, error: UsbError) -> Self {
        self.failures.open = Some(error);
        self
    }

    pub fn failing_select_configuration(mut self, error: UsbError) -> Self {
        self.failures.select_configuration = Some(error);
        self
    }

    pub fn failing_claim(mut self, error: UsbError) -> Self {
        self.failures.claim = Some(error);
        self
    }

    /// Fail the `index`-th control transfer (zero-based, counted across the device's lifetime)
    pub fn failing_control_at(mut self, index: usize, error: UsbError) -> Self {
        self.failures.control_at = Some((index, error));
        self
    }

    pub fn failing_bulk_out(mut self, error: UsbError) -> Self {
        self.failures.bulk_out = Some(error);
        self
    }

    pub fn failing_bulk_in(mut self, error: UsbError) -> Self {
        self.failures.bulk_in = Some(error);
        self
    }

    /// Hold the first `open` until the gate is notified
    ///
    /// Later opens go straight through.
    pub fn with_open_gate(self, gate: Arc<Notify>) -> Self {
        *self.open_gate.lock() = Some(gate);
        self
    }

    /// Hold every bulk-in read until the gate is notified
    pub fn with_bulk_in_gate(mut self, gate: Arc<Notify>) -> Self {
        self.bulk_in_gate = Some(gate);
        self
    }

    /// Queue a payload for the next bulk-in read
    pub fn queue_bulk_in(&self, data: Vec<u8>) {
        self.state.lock().bulk_in.push_back(data);
    }

    /// Operations performed so far
    pub fn ops(&self) -> Vec<MockOp> {
        self.state.lock().ops.clone()
    }

    /// Control transfers performed so far, as request codes
    pub fn control_requests(&self) -> Vec<u8> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                MockOp::ControlOut { request, .. } => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn record(&self, op: MockOp) {
        self.state.lock().ops.push(op);
    }
}

#[async_trait]
impl UsbDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    async fn open(&self) -> Result<(), UsbError> {
        let gate = self.open_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.record(MockOp::Open);
        if let Some(err) = &self.failures.open {
            return Err(err.clone());
        }
        self.state.lock().open = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), UsbError> {
        self.record(MockOp::Close);
        self.state.lock().open = false;
        Ok(())
    }

    async fn configuration(&self) -> Result<Option<ConfigurationInfo>, UsbError> {
        Ok(self.state.lock().active.clone())
    }

    async fn select_configuration(&self, value: u8) -> Result<(), UsbError> {
        self.record(MockOp::SelectConfiguration(value));
        if let Some(err) = &self.failures.select_configuration {
            return Err(err.clone());
        }
        if value != self.descriptor.value {
            return Err(UsbError::NotFound);
        }
        self.state.lock().active = Some(self.descriptor.clone());
        Ok(())
    }

    async fn select_alternate_interface(
        &self,
        interface: u8,
        alternate: u8,
    ) -> Result<(), UsbError> {
        self.record(MockOp::SelectAlternate {
            interface,
            alternate,
        });
        Ok(())
    }

    async fn claim_interface(&self, interface: u8) -> Result<(), UsbError> {
        self.record(MockOp::ClaimInterface(interface));
        match &self.failures.claim {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn control_transfer_out(
        &self,
        setup: &ControlSetup,
        data: &[u8],
    ) -> Result<usize, UsbError> {
        let index = {
            let mut state = self.state.lock();
            state.ops.push(MockOp::ControlOut {
                request: setup.request,
                value: setup.value,
                index: setup.index,
                data: data.to_vec(),
            });
            state.control_count += 1;
            state.control_count - 1
        };
        match &self.failures.control_at {
            Some((at, err)) if *at == index => Err(err.clone()),
            _ => Ok(data.len()),
        }
    }

    async fn transfer_out(&self, endpoint_number: u8, data: &[u8]) -> Result<usize, UsbError> {
        self.record(MockOp::BulkOut {
            endpoint: endpoint_number,
            data: data.to_vec(),
        });
        match &self.failures.bulk_out {
            Some(err) => Err(err.clone()),
            None => Ok(data.len()),
        }
    }

    async fn transfer_in(&self, endpoint_number: u8, length: usize) -> Result<Vec<u8>, UsbError> {
        self.record(MockOp::BulkIn {
            endpoint: endpoint_number,
            length,
        });
        if let Some(gate) = &self.bulk_in_gate {
            gate.notified().await;
        }
        if let Some(err) = &self.failures.bulk_in {
            return Err(err.clone());
        }
        let mut data = self.state.lock().bulk_in.pop_front().unwrap_or_default();
        data.truncate(length);
        Ok(data)
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_device_info() {
        let info = create_mock_device_info(0x04a9, 0x1234);

        assert_eq!(info.vendor_id, 0x04a9);
        assert_eq!(info.product_id, 0x1234);
        assert_eq!(info.serial_number.as_deref(), Some("SN04a91234"));
    }

    #[test]
    fn test_create_mock_jpeg() {
        let data = create_mock_jpeg(300);

        assert_eq!(data.len(), 300);
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        assert_eq!(data[256], 0); // Wraps around
    }

    #[tokio::test]
    async fn test_mock_records_ops_in_order() {
        let device = MockDevice::new(create_mock_device_info(1, 2))
            .with_interfaces(vec![vendor_interface(0, &[(2, true)])]);

        device.open().await.unwrap();
        assert!(device.configuration().await.unwrap().is_none());
        device.select_configuration(1).await.unwrap();
        assert!(device.configuration().await.unwrap().is_some());
        device.claim_interface(0).await.unwrap();

        assert_eq!(
            device.ops(),
            vec![
                MockOp::Open,
                MockOp::SelectConfiguration(1),
                MockOp::ClaimInterface(0)
            ]
        );
    }

    #[tokio::test]
    async fn test_mock_control_failure_index() {
        let device =
            MockDevice::new(create_mock_device_info(1, 2)).failing_control_at(1, UsbError::Pipe);
        let setup = ControlSetup::vendor(7, 0, 0);

        assert!(device.control_transfer_out(&setup, &[]).await.is_ok());
        assert_eq!(
            device.control_transfer_out(&setup, &[]).await,
            Err(UsbError::Pipe)
        );
        assert!(device.control_transfer_out(&setup, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_bulk_in_queue() {
        let device = MockDevice::new(create_mock_device_info(1, 2));
        device.queue_bulk_in(vec![1, 2, 3, 4]);

        assert_eq!(device.transfer_in(2, 3).await.unwrap(), vec![1, 2, 3]);
        assert!(device.transfer_in(2, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}
