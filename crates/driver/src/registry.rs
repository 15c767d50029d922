//! Device registry
//!
//! Maps opaque device identifiers to live device handles for as long as the
//! device stays connected. Registration is last-write-wins so a hot-plugged
//! device re-registering under the same identifier replaces the stale entry.

use common::UsbDevice;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Shared handle to a connected device
pub type SharedDevice = Arc<dyn UsbDevice>;

/// Registry of connected devices, keyed by device identifier
///
/// Constructed once per process and shared by reference. Never performs I/O.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, SharedDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the device registered under `id`
    ///
    /// Returns the previously registered device, if any.
    pub fn register(&self, id: impl Into<String>, device: SharedDevice) -> Option<SharedDevice> {
        let id = id.into();
        let info = device.info();
        debug!(
            "Registering device {} ({:04x}:{:04x})",
            id, info.vendor_id, info.product_id
        );
        self.devices.write().insert(id, device)
    }

    pub fn lookup(&self, id: &str) -> Option<SharedDevice> {
        self.devices.read().get(id).cloned()
    }

    pub fn unregister(&self, id: &str) -> Option<SharedDevice> {
        let removed = self.devices.write().remove(id);
        if removed.is_some() {
            debug!("Unregistered device {}", id);
        }
        removed
    }

    /// Identifiers of all registered devices, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Remove every registration, returning what was registered
    pub fn teardown(&self) -> Vec<(String, SharedDevice)> {
        self.devices.write().drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockDevice, create_mock_device_info};

    fn mock(vendor_id: u16, product_id: u16) -> SharedDevice {
        Arc::new(MockDevice::new(create_mock_device_info(vendor_id, product_id)))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.register("usb-A", mock(1, 2)).is_none());
        let found = registry.lookup("usb-A").unwrap();
        assert_eq!(found.info().product_id, 2);
        assert!(registry.lookup("usb-B").is_none());
    }

    #[test]
    fn test_register_last_write_wins() {
        let registry = DeviceRegistry::new();
        registry.register("usb-A", mock(1, 2));
        let previous = registry.register("usb-A", mock(1, 3));

        assert_eq!(previous.map(|d| d.info().product_id), Some(2));
        assert_eq!(registry.lookup("usb-A").unwrap().info().product_id, 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_and_teardown() {
        let registry = DeviceRegistry::new();
        registry.register("usb-B", mock(1, 2));
        registry.register("usb-A", mock(3, 4));
        assert_eq!(registry.ids(), vec!["usb-A".to_string(), "usb-B".to_string()]);

        assert!(registry.unregister("usb-A").is_some());
        assert!(registry.unregister("usb-A").is_none());

        let drained = registry.teardown();
        assert_eq!(drained.len(), 1);
        assert!(registry.is_empty());
    }
}
