//! USB subsystem
//!
//! libusb calls block, so all of them run on a dedicated worker thread that
//! owns the context and every open handle. The async side talks to it through
//! [`BridgedDevice`], which is what the driver registers for each discovered
//! device.

pub mod bridged;
pub mod device;
pub mod discovery;
pub mod manager;
pub mod transfers;
pub mod worker;

pub use bridged::BridgedDevice;
pub use discovery::{RegisteredDevice, discover, list_devices};
pub use manager::DeviceManager;
pub use worker::{UsbWorkerThread, spawn_usb_worker};
