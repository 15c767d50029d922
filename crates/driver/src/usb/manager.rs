//! USB device manager
//!
//! Enumerates connected devices and tracks the ones we may drive. Runs on the
//! USB worker thread.

use crate::usb::device::RawDevice;
use common::DiscoveredDevice;
use protocol::DeviceKey;
use rusb::{Context, Device, UsbContext};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Linux Foundation vendor id, used by root hubs
const ROOT_HUB_VENDOR: u16 = 0x1d6b;
const CLASS_HUB: u8 = 0x09;

pub struct DeviceManager {
    context: Context,
    devices: HashMap<DeviceKey, RawDevice>,
    /// Device filters (VID:PID patterns)
    allowed_filters: Vec<String>,
}

impl DeviceManager {
    pub fn new(allowed_filters: Vec<String>) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        Ok(Self {
            context,
            devices: HashMap::new(),
            allowed_filters,
        })
    }

    /// Re-enumerate the bus
    ///
    /// Newly connected devices are added; devices no longer present are
    /// dropped, which releases their handles. Devices still present keep
    /// their open handles.
    pub fn refresh(&mut self) -> Result<(), rusb::Error> {
        let mut present = HashSet::new();

        for device in self.context.devices()?.iter() {
            let key = DeviceKey {
                bus: device.bus_number(),
                address: device.address(),
            };
            if self.devices.contains_key(&key) {
                present.insert(key);
                continue;
            }
            if !self.is_device_allowed(&device) {
                continue;
            }

            match RawDevice::new(device) {
                Ok(raw) => {
                    debug!("Added device {}", key);
                    self.devices.insert(key, raw);
                    present.insert(key);
                }
                Err(e) => warn!("Failed to add device {}: {}", key, e),
            }
        }

        self.devices.retain(|key, _| {
            let keep = present.contains(key);
            if !keep {
                info!("Device {} disconnected", key);
            }
            keep
        });

        debug!("Tracking {} devices", self.devices.len());
        Ok(())
    }

    /// Re-enumerate, then describe every tracked device
    pub fn list_devices(&mut self) -> Vec<DiscoveredDevice> {
        if let Err(e) = self.refresh() {
            warn!("Device enumeration failed: {}", e);
        }

        self.devices
            .values()
            .map(|device| DiscoveredDevice {
                key: device.key(),
                info: device.device_info(),
                configuration: device.configuration().unwrap_or_else(|e| {
                    debug!("No configuration for {}: {}", device.key(), e);
                    None
                }),
            })
            .collect()
    }

    pub fn device_mut(&mut self, key: DeviceKey) -> Option<&mut RawDevice> {
        self.devices.get_mut(&key)
    }

    /// Get USB context
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn is_device_allowed(&self, device: &Device<Context>) -> bool {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => return false,
        };

        // Root hubs are VID 0x1d6b (Linux Foundation) with device class 9 (Hub)
        if desc.vendor_id() == ROOT_HUB_VENDOR && desc.class_code() == CLASS_HUB {
            debug!(
                "Skipping root hub: bus={}, addr={}",
                device.bus_number(),
                device.address()
            );
            return false;
        }

        let allowed = Self::check_filter(desc.vendor_id(), desc.product_id(), &self.allowed_filters);
        if !allowed {
            debug!(
                "Device ignored by filter: vid={:#06x}, pid={:#06x}",
                desc.vendor_id(),
                desc.product_id()
            );
        }
        allowed
    }

    /// Check if a VID/PID pair is allowed by the filters
    pub(crate) fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
        // If no filters are defined, all devices are allowed
        if filters.is_empty() {
            return true;
        }

        filters.iter().any(|filter| {
            if filter == "*" {
                return true;
            }
            // Filters are validated by the config loader
            let Some((vid_str, pid_str)) = filter.split_once(':') else {
                return false;
            };
            matches_id(vid_str, vid) && matches_id(pid_str, pid)
        })
    }
}

fn matches_id(pattern: &str, id: u16) -> bool {
    if pattern == "*" {
        return true;
    }
    let hex = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    u16::from_str_radix(hex, 16).is_ok_and(|v| v == id)
}
