//! Common utilities for scan-driver
//!
//! This crate provides shared functionality for the driver layer: the USB
//! device capability trait and descriptor snapshots, the error taxonomy,
//! logging setup, the async channel bridge to the USB worker thread, and
//! test utilities.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use channel::{DiscoveredDevice, UsbBridge, UsbCommand, UsbWorker, create_usb_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{
    AlternateInfo, ConfigurationInfo, DeviceInfo, DeviceKind, InterfaceInfo, UsbDevice,
    detect_kind,
};
