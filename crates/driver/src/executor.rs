//! Transfer execution
//!
//! The single point of contact with the physical transport for data
//! movement. Holds no per-device state: every call is parameterized by the
//! session it runs against. Each transfer is raced against the configured
//! per-transfer timeout.

use crate::session::Session;
use common::{Error, Result, UsbDevice};
use protocol::{ControlSetup, UsbError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for USB transfers (5 seconds)
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct TransferExecutor {
    transfer_timeout: Duration,
}

impl Default for TransferExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSFER_TIMEOUT)
    }
}

impl TransferExecutor {
    pub fn new(transfer_timeout: Duration) -> Self {
        Self { transfer_timeout }
    }

    /// Write to the session's bulk-out endpoint
    pub async fn bulk_out(
        &self,
        device: &dyn UsbDevice,
        session: &Session,
        data: &[u8],
    ) -> Result<usize> {
        let endpoint = session
            .bulk_out()
            .ok_or_else(|| Error::NoBulkOutEndpoint(session.device_id.clone()))?;

        debug!(
            "Bulk OUT: device={}, endpoint={:#x}, data_len={}",
            session.device_id,
            endpoint.address(),
            data.len()
        );

        self.guard(device.transfer_out(endpoint.endpoint_number, data))
            .await
            .map_err(|source| stall(session, source))
    }

    /// Read at most `max_length` bytes from the session's bulk-in endpoint
    ///
    /// A zero-length read is reported as [`Error::EmptyTransfer`].
    pub async fn bulk_in(
        &self,
        device: &dyn UsbDevice,
        session: &Session,
        max_length: usize,
    ) -> Result<Vec<u8>> {
        let endpoint = session
            .bulk_in()
            .ok_or_else(|| Error::NoBulkInEndpoint(session.device_id.clone()))?;

        debug!(
            "Bulk IN: device={}, endpoint={:#x}, max_len={}",
            session.device_id,
            endpoint.address(),
            max_length
        );

        let data = self
            .guard(device.transfer_in(endpoint.endpoint_number, max_length))
            .await
            .map_err(|source| stall(session, source))?;

        if data.is_empty() {
            return Err(Error::EmptyTransfer(session.device_id.clone()));
        }

        debug!("Bulk IN succeeded: {} bytes", data.len());
        Ok(data)
    }

    /// Issue a host-to-device control transfer
    pub async fn control_out(
        &self,
        device: &dyn UsbDevice,
        session: &Session,
        setup: &ControlSetup,
    ) -> Result<usize> {
        self.issue_control(device, setup)
            .await
            .map_err(|source| stall(session, source))
    }

    /// Control transfer with transport-level error reporting
    ///
    /// Used during preparation, before a session exists.
    pub(crate) async fn issue_control(
        &self,
        device: &dyn UsbDevice,
        setup: &ControlSetup,
    ) -> std::result::Result<usize, UsbError> {
        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, data_len={}",
            setup.request_type_byte(),
            setup.request,
            setup.value,
            setup.index,
            setup.payload().len()
        );

        self.guard(device.control_transfer_out(setup, setup.payload()))
            .await
            .inspect_err(|e| warn!("Control transfer failed: {}", e))
    }

    /// Race a transport call against the per-transfer timeout
    pub(crate) async fn guard<T>(
        &self,
        transfer: impl Future<Output = std::result::Result<T, UsbError>>,
    ) -> std::result::Result<T, UsbError> {
        tokio::time::timeout(self.transfer_timeout, transfer)
            .await
            .unwrap_or(Err(UsbError::Timeout))
    }
}

fn stall(session: &Session, source: UsbError) -> Error {
    warn!("Transfer failed on device {}: {}", session.device_id, source);
    Error::TransportStall {
        device_id: session.device_id.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EndpointSource;
    use common::test_utils::{MockDevice, MockOp, create_mock_device_info};
    use protocol::{Direction, Endpoint, EndpointType};

    fn session(endpoints: Vec<Endpoint>) -> Session {
        Session {
            device_id: "usb-test".to_string(),
            configuration_value: 1,
            interface_number: 0,
            alternate_setting: None,
            endpoints,
            claimed: true,
            source: EndpointSource::Profile,
        }
    }

    fn bulk(number: u8, direction: Direction) -> Endpoint {
        Endpoint::new(number, direction, EndpointType::Bulk)
    }

    #[tokio::test]
    async fn test_bulk_out_uses_bulk_out_endpoint() {
        let device = MockDevice::new(create_mock_device_info(1, 2));
        let session = session(vec![
            Endpoint::new(3, Direction::Out, EndpointType::Interrupt),
            bulk(1, Direction::Out),
        ]);

        let written = TransferExecutor::default()
            .bulk_out(&device, &session, &[1, 2, 3])
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(
            device.ops(),
            vec![MockOp::BulkOut {
                endpoint: 1,
                data: vec![1, 2, 3]
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_endpoints() {
        let device = MockDevice::new(create_mock_device_info(1, 2));
        let session = session(vec![Endpoint::new(1, Direction::In, EndpointType::Interrupt)]);
        let executor = TransferExecutor::default();

        assert!(matches!(
            executor.bulk_out(&device, &session, &[1]).await,
            Err(Error::NoBulkOutEndpoint(_))
        ));
        assert!(matches!(
            executor.bulk_in(&device, &session, 64).await,
            Err(Error::NoBulkInEndpoint(_))
        ));
        assert!(device.ops().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_in_empty_transfer() {
        let device = MockDevice::new(create_mock_device_info(1, 2));
        let session = session(vec![bulk(2, Direction::In)]);

        assert!(matches!(
            TransferExecutor::default().bulk_in(&device, &session, 64).await,
            Err(Error::EmptyTransfer(_))
        ));
    }

    #[tokio::test]
    async fn test_bulk_in_returns_data() {
        let device = MockDevice::new(create_mock_device_info(1, 2));
        device.queue_bulk_in(vec![9; 10]);
        let session = session(vec![bulk(2, Direction::In)]);

        let data = TransferExecutor::default()
            .bulk_in(&device, &session, 64)
            .await
            .unwrap();

        assert_eq!(data, vec![9; 10]);
        assert_eq!(
            device.ops(),
            vec![MockOp::BulkIn {
                endpoint: 2,
                length: 64
            }]
        );
    }

    #[tokio::test]
    async fn test_transport_error_maps_to_stall() {
        let device =
            MockDevice::new(create_mock_device_info(1, 2)).failing_bulk_out(UsbError::Pipe);
        let session = session(vec![bulk(1, Direction::Out)]);

        let err = TransferExecutor::default()
            .bulk_out(&device, &session, &[1])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::TransportStall {
                source: UsbError::Pipe,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_control_out_carries_payload() {
        let device = MockDevice::new(create_mock_device_info(1, 2));
        let session = session(vec![]);
        let setup = ControlSetup::vendor(0x22, 0x0300, 1).with_data(vec![0xAA]);

        TransferExecutor::default()
            .control_out(&device, &session, &setup)
            .await
            .unwrap();

        assert_eq!(
            device.ops(),
            vec![MockOp::ControlOut {
                request: 0x22,
                value: 0x0300,
                index: 1,
                data: vec![0xAA]
            }]
        );
    }

    #[tokio::test]
    async fn test_guard_times_out() {
        let executor = TransferExecutor::new(Duration::from_millis(10));
        let result: std::result::Result<(), UsbError> = executor
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(UsbError::Timeout));
    }
}
