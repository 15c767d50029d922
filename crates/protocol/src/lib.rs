//! Protocol library for scan-driver
//!
//! This crate defines the data shared between every layer of the generic USB
//! scanner driver: the declarative driver profile schema, endpoint and
//! control-transfer descriptions, transport error conditions, and the format
//! sniffer that turns raw scanned bytes into a self-describing payload.
//!
//! # Example
//!
//! ```
//! use protocol::{DriverProfile, MediaType, sniff};
//!
//! let body = br#"{
//!     "vendorId": 1193,
//!     "productId": 4660,
//!     "interfaceNumber": 0,
//!     "endpoints": [{ "endpointNumber": 2, "direction": "in", "type": "bulk" }]
//! }"#;
//! let profile = DriverProfile::from_json(body).unwrap();
//! assert_eq!(profile.key(), (0x04a9, 0x1234));
//!
//! assert_eq!(sniff(&[0xFF, 0xD8, 0xFF]), MediaType::Jpeg);
//! ```

pub mod error;
pub mod media;
pub mod profile;
pub mod types;

pub use error::{ProfileError, Result};
pub use media::{DataUrlError, MediaType, ScanResult, decode_data_url, encode_data_url, sniff};
pub use types::{
    ControlSetup, DeviceKey, Direction, DriverProfile, Endpoint, EndpointType, Recipient,
    RequestType, ScanStep, UsbError,
};
