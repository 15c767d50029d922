//! rusb device wrapper
//!
//! Owns one `rusb::Device` and, while open, its handle. Lives on the USB
//! worker thread only.

use common::{AlternateInfo, ConfigurationInfo, DeviceInfo, InterfaceInfo};
use protocol::{DeviceKey, Direction, Endpoint, EndpointType};
use rusb::{ConfigDescriptor, Context, Device, DeviceDescriptor, DeviceHandle};
use tracing::{debug, warn};

pub struct RawDevice {
    device: Device<Context>,
    key: DeviceKey,
    descriptor: DeviceDescriptor,
    handle: Option<DeviceHandle<Context>>,
    /// Interfaces claimed by us
    claimed_interfaces: Vec<u8>,
    /// Interfaces whose kernel driver we detached
    detached_interfaces: Vec<u8>,
}

impl RawDevice {
    /// Wrap a device, reading and caching its descriptor
    pub fn new(device: Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        let key = DeviceKey {
            bus: device.bus_number(),
            address: device.address(),
        };

        Ok(Self {
            device,
            key,
            descriptor,
            handle: None,
            claimed_interfaces: Vec::new(),
            detached_interfaces: Vec::new(),
        })
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    /// Identity including string descriptors, when readable
    pub fn device_info(&self) -> DeviceInfo {
        let (manufacturer, product, serial_number) = match &self.handle {
            Some(handle) => self.read_string_descriptors(handle),
            None => self
                .device
                .open()
                .map(|handle| self.read_string_descriptors(&handle))
                .unwrap_or((None, None, None)),
        };

        DeviceInfo {
            vendor_id: self.descriptor.vendor_id(),
            product_id: self.descriptor.product_id(),
            serial_number,
            manufacturer,
            product,
            class: self.descriptor.class_code(),
        }
    }

    /// Active configuration, or `None` if the device is unconfigured
    pub fn configuration(&self) -> Result<Option<ConfigurationInfo>, rusb::Error> {
        match self.device.active_config_descriptor() {
            Ok(config) => Ok(Some(describe_configuration(&config))),
            Err(rusb::Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn open(&mut self) -> Result<(), rusb::Error> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = self.device.open()?;
        debug!("Opened device {}", self.key);
        self.handle = Some(handle);
        Ok(())
    }

    /// Release claimed interfaces, reattach kernel drivers and drop the handle
    pub fn close(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };

        for interface in self.claimed_interfaces.drain(..) {
            if let Err(e) = handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        }

        for interface in self.detached_interfaces.drain(..) {
            match handle.attach_kernel_driver(interface) {
                Ok(()) => debug!(
                    "Reattached kernel driver to interface {} on device {}",
                    interface, self.key
                ),
                Err(e) => debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                ),
            }
        }

        debug!("Closed device {}", self.key);
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Open handle, or `NotFound` if the device was never opened
    pub fn handle(&self) -> Result<&DeviceHandle<Context>, rusb::Error> {
        self.handle.as_ref().ok_or(rusb::Error::NotFound)
    }

    pub fn select_configuration(&mut self, value: u8) -> Result<(), rusb::Error> {
        let handle = self.handle.as_mut().ok_or(rusb::Error::NotFound)?;
        handle.set_active_configuration(value)?;
        debug!("Selected configuration {} on device {}", value, self.key);
        Ok(())
    }

    /// Claim an interface, detaching any kernel driver bound to it
    pub fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        if self.claimed_interfaces.contains(&interface) {
            return Ok(());
        }
        let handle = self.handle.as_mut().ok_or(rusb::Error::NotFound)?;

        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on device {}",
                    interface, self.key
                );
                handle.detach_kernel_driver(interface)?;
                self.detached_interfaces.push(interface);
            }
            Ok(false) => {}
            Err(e) => debug!(
                "Could not check kernel driver status for interface {}: {}",
                interface, e
            ),
        }

        handle.claim_interface(interface)?;
        self.claimed_interfaces.push(interface);
        debug!("Claimed interface {} on device {}", interface, self.key);
        Ok(())
    }

    /// Select an alternate setting
    ///
    /// libusb only switches settings on a claimed interface, so the interface
    /// is claimed first when needed.
    pub fn select_alternate(&mut self, interface: u8, alternate: u8) -> Result<(), rusb::Error> {
        self.claim_interface(interface)?;
        let handle = self.handle.as_mut().ok_or(rusb::Error::NotFound)?;
        handle.set_alternate_setting(interface, alternate)?;
        debug!(
            "Selected alternate setting {} on interface {} of device {}",
            alternate, interface, self.key
        );
        Ok(())
    }

    fn read_string_descriptors(
        &self,
        handle: &DeviceHandle<Context>,
    ) -> (Option<String>, Option<String>, Option<String>) {
        let manufacturer = self
            .descriptor
            .manufacturer_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        let product = self
            .descriptor
            .product_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        let serial_number = self
            .descriptor
            .serial_number_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        (manufacturer, product, serial_number)
    }
}

impl Drop for RawDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Snapshot a configuration descriptor tree
pub fn describe_configuration(config: &ConfigDescriptor) -> ConfigurationInfo {
    ConfigurationInfo {
        value: config.number(),
        interfaces: config
            .interfaces()
            .map(|interface| InterfaceInfo {
                number: interface.number(),
                alternates: interface
                    .descriptors()
                    .map(|alt| AlternateInfo {
                        setting: alt.setting_number(),
                        class_code: alt.class_code(),
                        subclass_code: alt.sub_class_code(),
                        protocol_code: alt.protocol_code(),
                        endpoints: alt
                            .endpoint_descriptors()
                            .filter_map(|ep| {
                                map_transfer_type(ep.transfer_type()).map(|transfer_type| {
                                    Endpoint::new(
                                        ep.number(),
                                        map_direction(ep.direction()),
                                        transfer_type,
                                    )
                                })
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

/// Non-control endpoint types; control endpoints never appear in a session
fn map_transfer_type(transfer_type: rusb::TransferType) -> Option<EndpointType> {
    match transfer_type {
        rusb::TransferType::Bulk => Some(EndpointType::Bulk),
        rusb::TransferType::Interrupt => Some(EndpointType::Interrupt),
        rusb::TransferType::Isochronous => Some(EndpointType::Isochronous),
        rusb::TransferType::Control => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_direction() {
        assert_eq!(map_direction(rusb::Direction::In), Direction::In);
        assert_eq!(map_direction(rusb::Direction::Out), Direction::Out);
    }

    #[test]
    fn test_map_transfer_type() {
        assert_eq!(
            map_transfer_type(rusb::TransferType::Bulk),
            Some(EndpointType::Bulk)
        );
        assert_eq!(
            map_transfer_type(rusb::TransferType::Isochronous),
            Some(EndpointType::Isochronous)
        );
        assert_eq!(map_transfer_type(rusb::TransferType::Control), None);
    }
}
