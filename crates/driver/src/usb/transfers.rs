//! USB transfer execution
//!
//! Blocking control and bulk transfers on an open rusb handle, run on the
//! USB worker thread. Errors are mapped to protocol errors in one place.

use protocol::{ControlSetup, UsbError};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Direction bit of an endpoint address
pub const ENDPOINT_IN: u8 = 0x80;

/// Execute a host-to-device control transfer
pub fn control_out(
    handle: &DeviceHandle<Context>,
    setup: &ControlSetup,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, UsbError> {
    let request_type = setup.request_type_byte();
    debug!(
        "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, data_len={}",
        request_type,
        setup.request,
        setup.value,
        setup.index,
        data.len()
    );

    handle
        .write_control(
            request_type,
            setup.request,
            setup.value,
            setup.index,
            data,
            timeout,
        )
        .map_err(|e| {
            warn!("Control transfer failed: {}", e);
            map_rusb_error(e)
        })
}

/// Execute a bulk OUT transfer on an endpoint address
pub fn bulk_out(
    handle: &DeviceHandle<Context>,
    endpoint: u8,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, UsbError> {
    debug!(
        "Bulk OUT: endpoint={:#x}, data_len={}, timeout={}ms",
        endpoint,
        data.len(),
        timeout.as_millis()
    );

    handle.write_bulk(endpoint, data, timeout).map_err(|e| {
        warn!("Bulk OUT on {:#x} failed: {}", endpoint, e);
        map_rusb_error(e)
    })
}

/// Execute a bulk IN transfer on an endpoint address, reading at most `length` bytes
pub fn bulk_in(
    handle: &DeviceHandle<Context>,
    endpoint: u8,
    length: usize,
    timeout: Duration,
) -> Result<Vec<u8>, UsbError> {
    debug!(
        "Bulk IN: endpoint={:#x}, max_len={}, timeout={}ms",
        endpoint,
        length,
        timeout.as_millis()
    );

    let mut buffer = vec![0u8; length];
    match handle.read_bulk(endpoint, &mut buffer, timeout) {
        Ok(len) => {
            buffer.truncate(len);
            debug!("Bulk IN succeeded: {} bytes", len);
            Ok(buffer)
        }
        Err(e) => {
            warn!("Bulk IN on {:#x} failed: {}", endpoint, e);
            Err(map_rusb_error(e))
        }
    }
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
