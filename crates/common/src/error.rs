//! Common error types
//!
//! Every failure past profile resolution surfaces as one narrow variant so the
//! caller can tell "device not found" apart from "device error, reconnect".

use protocol::UsbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Device {0} is not registered")]
    DeviceNotRegistered(String),

    #[error("Failed to open device {device_id}")]
    DeviceOpenFailed {
        device_id: String,
        #[source]
        source: UsbError,
    },

    #[error("Failed to select configuration {value} on device {device_id}")]
    ConfigurationFailed {
        device_id: String,
        value: u8,
        #[source]
        source: UsbError,
    },

    #[error("Failed to claim interface {interface} on device {device_id}")]
    InterfaceClaimFailed {
        device_id: String,
        interface: u8,
        #[source]
        source: UsbError,
    },

    #[error("Initialization control step {step} failed on device {device_id}")]
    ControlInitFailed {
        device_id: String,
        step: usize,
        #[source]
        source: UsbError,
    },

    #[error("Session for device {0} has no bulk-out endpoint")]
    NoBulkOutEndpoint(String),

    #[error("Session for device {0} has no bulk-in endpoint")]
    NoBulkInEndpoint(String),

    #[error("Bulk-in transfer on device {0} returned no data")]
    EmptyTransfer(String),

    #[error("Device {0} is not prepared")]
    NotPrepared(String),

    #[error("Device {0} is already being prepared")]
    AlreadyPreparing(String),

    #[error("Transfer rejected by device {device_id}")]
    TransportStall {
        device_id: String,
        #[source]
        source: UsbError,
    },

    #[error("Operation on device {0} exceeded its deadline")]
    TimedOut(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure leaves the device's claim in an unknown state
    ///
    /// Such sessions are dropped and must be prepared again.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Error::TransportStall { .. } | Error::TimedOut(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
