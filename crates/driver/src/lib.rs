//! Generic USB scanner driver
//!
//! Turns an opaque, vendor-specific imaging peripheral into a uniform
//! "prepare, scan, receive image bytes" contract. How to talk to a device is
//! described by a declarative driver profile fetched from a profile store;
//! devices without a profile are driven from their USB descriptors.
//!
//! Data flows through the components in this order:
//!
//! - [`registry::DeviceRegistry`] maps device ids to live handles
//! - [`resolver::ProfileResolver`] finds the profile for a vendor/product pair
//! - [`session::SessionManager`] opens, configures and claims the device
//! - [`orchestrator::ScanOrchestrator`] runs the scan handshake and read
//! - [`executor::TransferExecutor`] performs every transfer
//!
//! [`driver::ScanDriver`] is the entry point for callers.
//!
//! # Example
//!
//! ```no_run
//! use driver::{DeviceRegistry, DriverOptions, ProfileResolver, ScanDriver};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let registry = Arc::new(DeviceRegistry::new());
//! let resolver = Arc::new(ProfileResolver::cache_only()?);
//! let driver = ScanDriver::new(registry, resolver, DriverOptions::default());
//!
//! driver.prepare("usb-SN1234").await?;
//! if let Some(scan) = driver.scan("usb-SN1234").await? {
//!     println!("{}", scan.data_url());
//! }
//! driver.close("usb-SN1234").await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod usb;

pub use config::DriverConfig;
pub use driver::{DriverOptions, ScanDriver};
pub use executor::TransferExecutor;
pub use orchestrator::ScanOrchestrator;
pub use registry::{DeviceRegistry, SharedDevice};
pub use resolver::{ProfileResolver, ProfileUnavailable, Resolution};
pub use session::{EndpointSource, PrepareState, Session, SessionManager};
