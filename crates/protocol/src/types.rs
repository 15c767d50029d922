//! USB and driver profile type definitions
//!
//! This module defines the declarative profile schema that describes how to
//! talk to one vendor/product combination, plus the transport-level error
//! conditions shared by every layer of the driver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical location of a device on the host (bus number, device address)
///
/// Used by the USB worker thread to find the `rusb::Device` behind an
/// opaque driver-level identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    /// Bus number on the host
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// Endpoint direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Endpoint transfer type
///
/// Control endpoints are never listed: endpoint 0 is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    Bulk,
    Interrupt,
    Isochronous,
}

/// A numbered, directional data channel within an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Endpoint number without the direction bit (1-15)
    pub endpoint_number: u8,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub transfer_type: EndpointType,
}

impl Endpoint {
    pub fn new(endpoint_number: u8, direction: Direction, transfer_type: EndpointType) -> Self {
        Self {
            endpoint_number,
            direction,
            transfer_type,
        }
    }

    /// Endpoint address as seen on the wire (direction bit 7 set for IN)
    pub fn address(&self) -> u8 {
        match self.direction {
            Direction::In => 0x80 | self.endpoint_number,
            Direction::Out => self.endpoint_number,
        }
    }

    /// Whether this is a bulk endpoint in the given direction
    pub fn is_bulk(&self, direction: Direction) -> bool {
        self.transfer_type == EndpointType::Bulk && self.direction == direction
    }
}

/// Control request type (bits 5-6 of bmRequestType)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
}

/// Control request recipient (bits 0-4 of bmRequestType)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Setup packet fields for a host-to-device control transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSetup {
    pub request_type: RequestType,
    pub recipient: Recipient,
    /// Request byte (bRequest)
    pub request: u8,
    /// Value parameter (wValue)
    pub value: u16,
    /// Index parameter (wIndex)
    pub index: u16,
    /// Optional payload carried in the data stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

impl ControlSetup {
    /// Vendor request addressed to the device, with no data stage
    pub fn vendor(request: u8, value: u16, index: u16) -> Self {
        Self {
            request_type: RequestType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// bmRequestType byte for an OUT transfer
    pub fn request_type_byte(&self) -> u8 {
        let kind = match self.request_type {
            RequestType::Standard => 0x00,
            RequestType::Class => 0x20,
            RequestType::Vendor => 0x40,
        };
        let recipient = match self.recipient {
            Recipient::Device => 0x00,
            Recipient::Interface => 0x01,
            Recipient::Endpoint => 0x02,
            Recipient::Other => 0x03,
        };
        kind | recipient
    }

    /// Payload bytes, empty when no data stage is declared
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

/// One step of a scan-start handshake
///
/// A step may carry a control transfer, a bulk-out payload, or both. When
/// both are present the control transfer is issued first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlSetup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<Vec<u8>>,
}

impl ScanStep {
    pub fn control(setup: ControlSetup) -> Self {
        Self {
            control: Some(setup),
            out: None,
        }
    }

    pub fn bulk_out(data: Vec<u8>) -> Self {
        Self {
            control: None,
            out: Some(data),
        }
    }
}

/// Declarative description of how to talk to one vendor/product combination
///
/// Immutable once resolved. Parsed with [`DriverProfile::from_json`], which
/// rejects profiles with a missing field, an unknown enumerated value, or an
/// inconsistent endpoint list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverProfile {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface_number: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_setting: Option<u8>,
    pub endpoints: Vec<Endpoint>,
    /// Control transfers run once, in order, when a session is prepared
    #[serde(default, rename = "controlSequences")]
    pub control_sequence: Vec<ControlSetup>,
    /// Steps run, in order, to trigger a scan
    #[serde(default)]
    pub scan_start_sequence: Vec<ScanStep>,
}

/// USB error types
///
/// Maps to libusb error codes. See rusb::Error for details.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsbError {
    /// Transfer timed out
    #[error("transfer timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("endpoint stalled")]
    Pipe,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("device or endpoint not found")]
    NotFound,
    /// Device is busy
    #[error("device busy")]
    Busy,
    /// Buffer overflow
    #[error("buffer overflow")]
    Overflow,
    /// I/O error
    #[error("I/O error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}
