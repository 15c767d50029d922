//! USB type abstractions and utilities
//!
//! [`UsbDevice`] is the capability set the driver consumes from whatever
//! discovered the device. The driver never talks to libusb directly; the
//! production implementation forwards each call to the USB worker thread,
//! tests substitute a scripted mock.

use async_trait::async_trait;
use protocol::{ControlSetup, Direction, Endpoint, UsbError};

/// USB interface class for still-image devices (scanners)
pub const CLASS_STILL_IMAGE: u8 = 0x06;
/// USB interface class for printers
pub const CLASS_PRINTER: u8 = 0x07;
/// Vendor-specific interface class
pub const CLASS_VENDOR_SPECIFIC: u8 = 0xFF;

/// Static identity of a connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// Device-level class code (0 when classes are declared per interface)
    pub class: u8,
}

/// Snapshot of the active configuration's descriptor tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationInfo {
    /// bConfigurationValue
    pub value: u8,
    pub interfaces: Vec<InterfaceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    /// Alternate settings in descriptor order
    pub alternates: Vec<AlternateInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternateInfo {
    pub setting: u8,
    pub class_code: u8,
    pub subclass_code: u8,
    pub protocol_code: u8,
    pub endpoints: Vec<Endpoint>,
}

impl InterfaceInfo {
    /// Whether any alternate setting declares the given class
    pub fn has_class(&self, class_code: u8) -> bool {
        self.alternates.iter().any(|a| a.class_code == class_code)
    }
}

impl ConfigurationInfo {
    /// Pick the interface to claim when no profile is known
    ///
    /// Prefers the first vendor-specific interface, else the first interface.
    pub fn heuristic_interface(&self) -> Option<&InterfaceInfo> {
        self.interfaces
            .iter()
            .find(|i| i.has_class(CLASS_VENDOR_SPECIFIC))
            .or_else(|| self.interfaces.first())
    }
}

/// Broad kind of peripheral, derived from interface class codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Scanner,
    Printer,
    Unknown,
}

/// Detect the device kind from its active configuration
///
/// An unconfigured device is assumed to be a scanner.
pub fn detect_kind(configuration: Option<&ConfigurationInfo>) -> DeviceKind {
    let Some(config) = configuration else {
        return DeviceKind::Scanner;
    };

    // A printer function wins over a still-image one on multifunction devices
    if config.interfaces.iter().any(|i| i.has_class(CLASS_PRINTER)) {
        DeviceKind::Printer
    } else if config.interfaces.iter().any(|i| i.has_class(CLASS_STILL_IMAGE)) {
        DeviceKind::Scanner
    } else {
        DeviceKind::Unknown
    }
}

/// First bulk endpoint in the given direction
pub fn find_bulk(endpoints: &[Endpoint], direction: Direction) -> Option<&Endpoint> {
    endpoints.iter().find(|e| e.is_bulk(direction))
}

/// Operations the driver needs from a physical device
///
/// Every method is a suspension point: implementations complete or fail
/// without busy-waiting. Methods take `&self`; implementations serialize
/// access internally.
#[async_trait]
pub trait UsbDevice: Send + Sync {
    /// Static identity read at discovery time
    fn info(&self) -> &DeviceInfo;

    async fn open(&self) -> Result<(), UsbError>;

    /// Release claimed interfaces and close the handle
    async fn close(&self) -> Result<(), UsbError>;

    /// Active configuration, or `None` when the device is unconfigured
    async fn configuration(&self) -> Result<Option<ConfigurationInfo>, UsbError>;

    async fn select_configuration(&self, value: u8) -> Result<(), UsbError>;

    async fn select_alternate_interface(&self, interface: u8, alternate: u8)
    -> Result<(), UsbError>;

    async fn claim_interface(&self, interface: u8) -> Result<(), UsbError>;

    /// Host-to-device control transfer; returns bytes written
    async fn control_transfer_out(&self, setup: &ControlSetup, data: &[u8])
    -> Result<usize, UsbError>;

    /// Bulk OUT on the given endpoint number; returns bytes written
    async fn transfer_out(&self, endpoint_number: u8, data: &[u8]) -> Result<usize, UsbError>;

    /// Bulk IN on the given endpoint number, reading at most `length` bytes
    async fn transfer_in(&self, endpoint_number: u8, length: usize) -> Result<Vec<u8>, UsbError>;
}
