//! Device discovery
//!
//! Asks the USB worker for the connected devices, keeps the imaging
//! peripherals, and registers each one under a stable identifier. Devices
//! registered by an earlier pass that are no longer listed are forgotten.

use crate::driver::ScanDriver;
use crate::usb::bridged::BridgedDevice;
use common::{DeviceInfo, DeviceKind, DiscoveredDevice, Error, Result, UsbBridge, UsbCommand};
use protocol::DeviceKey;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// A device registered by [`discover`]
#[derive(Debug, Clone)]
pub struct RegisteredDevice {
    pub id: String,
    pub key: DeviceKey,
    pub kind: DeviceKind,
    pub info: DeviceInfo,
}

/// Enumerate devices through the worker
pub async fn list_devices(bridge: &UsbBridge) -> Result<Vec<DiscoveredDevice>> {
    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(UsbCommand::ListDevices { response: tx })
        .await?;
    rx.await
        .map_err(|_| Error::Channel("USB worker dropped the device list".to_string()))
}

/// Register every connected imaging device with `driver`
///
/// `class_filters` lists the device or interface classes to keep; an empty
/// list keeps everything. Registered ids missing from this enumeration are
/// forgotten along with their sessions.
pub async fn discover(
    bridge: &UsbBridge,
    driver: &ScanDriver,
    class_filters: &[u8],
) -> Result<Vec<RegisteredDevice>> {
    let registry = driver.registry();
    let transfer_timeout = driver.options().transfer_timeout;
    let mut registered = Vec::new();

    for device in list_devices(bridge).await? {
        if !matches_class(&device, class_filters) {
            debug!(
                "Skipping {:04x}:{:04x} at {}: no imaging class",
                device.info.vendor_id, device.info.product_id, device.key
            );
            continue;
        }

        let id = device_identifier(&device.info, device.key);
        let kind = common::detect_kind(device.configuration.as_ref());
        info!(
            "Discovered {:?} {} ({:04x}:{:04x}) at {}",
            kind, id, device.info.vendor_id, device.info.product_id, device.key
        );

        registry.register(
            id.clone(),
            Arc::new(BridgedDevice::new(
                bridge.clone(),
                device.key,
                device.info.clone(),
                transfer_timeout,
            )),
        );
        registered.push(RegisteredDevice {
            id,
            key: device.key,
            kind,
            info: device.info,
        });
    }

    let present: HashSet<&str> = registered.iter().map(|d| d.id.as_str()).collect();
    for id in registry.ids() {
        if !present.contains(id.as_str()) {
            driver.forget(&id);
        }
    }

    Ok(registered)
}

/// `usb-{serial}`, or `usb-{vid}{pid}-{bus}-{address}` when no serial is readable
///
/// The fallback stays the same for as long as the device remains plugged
/// into the same port.
pub fn device_identifier(info: &DeviceInfo, key: DeviceKey) -> String {
    match info.serial_number.as_deref().map(str::trim) {
        Some(serial) if !serial.is_empty() => format!("usb-{}", serial),
        _ => format!(
            "usb-{:04x}{:04x}-{}-{}",
            info.vendor_id, info.product_id, key.bus, key.address
        ),
    }
}

fn matches_class(device: &DiscoveredDevice, class_filters: &[u8]) -> bool {
    if class_filters.is_empty() || class_filters.contains(&device.info.class) {
        return true;
    }
    device.configuration.as_ref().is_some_and(|config| {
        config
            .interfaces
            .iter()
            .any(|i| class_filters.iter().any(|&c| i.has_class(c)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ConfigurationInfo;
    use common::create_usb_bridge;
    use crate::driver::DriverOptions;
    use crate::registry::DeviceRegistry;
    use crate::resolver::ProfileResolver;
    use common::test_utils::{
        MockDevice, class_interface, create_mock_device_info, vendor_interface,
    };

    const IMAGING: [u8; 3] = [0x06, 0x07, 0xFF];

    fn discovered(
        address: u8,
        info: DeviceInfo,
        interfaces: Option<Vec<common::InterfaceInfo>>,
    ) -> DiscoveredDevice {
        DiscoveredDevice {
            key: DeviceKey { bus: 1, address },
            info,
            configuration: interfaces.map(|interfaces| ConfigurationInfo {
                value: 1,
                interfaces,
            }),
        }
    }

    fn driver() -> ScanDriver {
        let resolver = Arc::new(ProfileResolver::cache_only().unwrap());
        ScanDriver::new(
            Arc::new(DeviceRegistry::new()),
            resolver,
            DriverOptions::default(),
        )
    }

    /// Fake worker answering one device list per pass
    fn serve_lists(
        worker: common::UsbWorker,
        passes: Vec<Vec<DiscoveredDevice>>,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            for devices in passes {
                match worker.recv_command().unwrap() {
                    UsbCommand::ListDevices { response } => {
                        let _ = response.send(devices);
                    }
                    other => panic!("unexpected command {:?}", other),
                }
            }
        })
    }

    #[test]
    fn test_device_identifier() {
        let key = DeviceKey { bus: 3, address: 12 };
        let info = create_mock_device_info(0x04a9, 0x1234);
        assert_eq!(device_identifier(&info, key), "usb-SN04a91234");

        let mut anonymous = info.clone();
        anonymous.serial_number = None;
        assert_eq!(device_identifier(&anonymous, key), "usb-04a91234-3-12");
        assert_eq!(
            device_identifier(&anonymous, key),
            device_identifier(&anonymous, key)
        );

        anonymous.serial_number = Some("  ".to_string());
        assert_eq!(device_identifier(&anonymous, key), "usb-04a91234-3-12");
    }

    #[test]
    fn test_matches_class() {
        let mut hid = create_mock_device_info(1, 1);
        hid.class = 0x03;

        let keyboard = discovered(1, hid.clone(), Some(vec![class_interface(0, 0x03, &[])]));
        assert!(!matches_class(&keyboard, &IMAGING));
        assert!(matches_class(&keyboard, &[]));

        let scanner = discovered(2, hid.clone(), Some(vec![class_interface(0, 0x06, &[])]));
        assert!(matches_class(&scanner, &IMAGING));

        let unconfigured = discovered(3, hid, None);
        assert!(!matches_class(&unconfigured, &IMAGING));

        let mut vendor = create_mock_device_info(2, 2);
        vendor.class = 0xFF;
        assert!(matches_class(&discovered(4, vendor, None), &IMAGING));
    }

    #[tokio::test]
    async fn test_discover_registers_imaging_devices() {
        let (bridge, worker) = create_usb_bridge();
        let mut keyboard = create_mock_device_info(0x046d, 0xc31c);
        keyboard.class = 0x03;

        let devices = vec![
            discovered(
                4,
                create_mock_device_info(0x04a9, 0x1234),
                Some(vec![vendor_interface(0, &[(2, true)])]),
            ),
            discovered(5, keyboard, Some(vec![class_interface(0, 0x03, &[])])),
            discovered(
                6,
                create_mock_device_info(0x03f0, 0x0001),
                Some(vec![class_interface(0, 0x07, &[(1, false)])]),
            ),
        ];

        let handle = serve_lists(worker, vec![devices]);

        let driver = driver();
        let registered = discover(&bridge, &driver, &IMAGING).await.unwrap();
        handle.join().unwrap();
        let registry = driver.registry();

        assert_eq!(registered.len(), 2);
        assert_eq!(
            registry.ids(),
            vec!["usb-SN03f00001".to_string(), "usb-SN04a91234".to_string()]
        );
        let printer = registered.iter().find(|d| d.key.address == 6).unwrap();
        assert_eq!(printer.kind, DeviceKind::Printer);
        let vendor = registered.iter().find(|d| d.key.address == 4).unwrap();
        assert_eq!(vendor.kind, DeviceKind::Unknown);
    }

    #[tokio::test]
    async fn test_discover_forgets_disconnected_devices() {
        let (bridge, worker) = create_usb_bridge();
        let scanner = discovered(
            4,
            create_mock_device_info(0x04a9, 0x1234),
            Some(vec![vendor_interface(0, &[(2, true)])]),
        );
        let handle = serve_lists(worker, vec![vec![scanner], vec![]]);

        let driver = driver();
        // A prepared device that has since been unplugged
        driver.registry().register(
            "usb-SNgone",
            Arc::new(
                MockDevice::new(create_mock_device_info(1, 2))
                    .with_interfaces(vec![vendor_interface(0, &[(2, true)])]),
            ),
        );
        driver.prepare("usb-SNgone").await.unwrap();

        discover(&bridge, &driver, &IMAGING).await.unwrap();
        assert_eq!(driver.registry().ids(), vec!["usb-SN04a91234".to_string()]);
        assert!(driver.session("usb-SNgone").is_none());

        discover(&bridge, &driver, &IMAGING).await.unwrap();
        handle.join().unwrap();
        assert!(driver.registry().is_empty());
    }

    #[tokio::test]
    async fn test_serial_less_device_keeps_its_id() {
        let (bridge, worker) = create_usb_bridge();
        let mut info = create_mock_device_info(0x04a9, 0x1234);
        info.serial_number = None;
        let device = discovered(9, info, Some(vec![class_interface(0, 0x06, &[(1, true)])]));
        let handle = serve_lists(worker, vec![vec![device.clone()], vec![device]]);

        let driver = driver();
        let first = discover(&bridge, &driver, &IMAGING).await.unwrap();
        let second = discover(&bridge, &driver, &IMAGING).await.unwrap();
        handle.join().unwrap();

        assert_eq!(first[0].id, "usb-04a91234-1-9");
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(driver.registry().ids(), vec![first[0].id.clone()]);
    }

    #[tokio::test]
    async fn test_discover_without_worker() {
        let (bridge, worker) = create_usb_bridge();
        drop(worker);

        let result = discover(&bridge, &driver(), &IMAGING).await;
        assert!(matches!(result, Err(Error::Channel(_))));
    }
}
