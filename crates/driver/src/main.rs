//! scan-driver
//!
//! Discovers USB imaging devices and scans from them using driver profiles
//! fetched from a profile store.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{UsbBridge, UsbCommand, create_usb_bridge, setup_logging};
use driver::usb::{RegisteredDevice, discover, spawn_usb_worker};
use driver::{DeviceRegistry, DriverConfig, DriverOptions, ProfileResolver, ScanDriver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "scan-driver")]
#[command(author, version, about = "Generic profile-driven USB scanner driver")]
#[command(long_about = "
Drives USB document scanners without vendor software. Each device is
described by a driver profile fetched from a profile store; devices without
a profile are driven from their USB descriptors.

EXAMPLES:
    # List connected imaging devices
    scan-driver --list-devices

    # Scan and print the image as a data URL
    scan-driver --scan usb-SN1234

    # Scan to a file
    scan-driver --scan usb-SN1234 --output page.jpg

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/scan-driver/driver.toml
    3. /etc/scan-driver/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List imaging devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Prepare the device and scan one image
    #[arg(long, value_name = "DEVICE_ID")]
    scan: Option<String>,

    /// Write the scanned bytes here instead of printing a data URL
    #[arg(short, long, value_name = "PATH", requires = "scan")]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        DriverConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("scan-driver v{}", env!("CARGO_PKG_VERSION"));

    let resolver = Arc::new(
        ProfileResolver::new(
            config.profiles.store_url()?,
            config.profiles.fetch_timeout(),
        )
        .context("Failed to create profile resolver")?,
    );
    if let Some(dir) = config.profiles.local_dir() {
        resolver
            .load_dir(&dir)
            .context("Failed to load local profiles")?;
    }

    let (usb_bridge, worker) = create_usb_bridge();
    let usb_worker_handle = spawn_usb_worker(worker, config.usb.filters.clone())
        .context("Failed to spawn USB worker thread")?;

    let driver = ScanDriver::new(
        Arc::new(DeviceRegistry::new()),
        resolver,
        DriverOptions::from(&config.usb),
    );

    let result = match discover(&usb_bridge, &driver, &config.usb.class_filters).await {
        Ok(devices) => {
            if args.list_devices || args.scan.is_none() {
                print_devices(&devices);
            }
            match args.scan {
                Some(device_id) => tokio::select! {
                    result = scan_mode(&driver, &device_id, args.output.as_deref()) => result,
                    _ = signal::ctrl_c() => {
                        warn!("Interrupted, abandoning scan");
                        Ok(())
                    }
                },
                None => Ok(()),
            }
        }
        Err(e) => Err(anyhow::Error::new(e).context("Device discovery failed")),
    };
    driver.teardown().await;

    info!("Shutting down USB subsystem...");
    if let Err(e) = shutdown_usb_worker(usb_bridge).await {
        error!("Error shutting down USB worker: {:#}", e);
    }
    match usb_worker_handle.join() {
        Ok(Err(e)) => error!("USB worker failed: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
        Ok(Ok(())) => {}
    }

    result
}

fn print_devices(devices: &[RegisteredDevice]) {
    if devices.is_empty() {
        println!("No imaging devices found.");
        return;
    }

    println!("Found {} imaging device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {} {:04x}:{:04x} - {} {} ({:?})",
            device.id,
            device.info.vendor_id,
            device.info.product_id,
            device
                .info
                .manufacturer
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.info.product.as_deref().unwrap_or("Unknown Product"),
            device.kind
        );
        println!("      Bus {:03} Device {:03}", device.key.bus, device.key.address);
        println!();
    }
}

async fn scan_mode(driver: &ScanDriver, device_id: &str, output: Option<&Path>) -> Result<()> {
    let session = driver
        .prepare(device_id)
        .await
        .with_context(|| format!("Failed to prepare {}", device_id))?;
    info!(
        "Session ready on interface {} ({:?} endpoints)",
        session.interface_number, session.source
    );

    let scan = driver
        .scan(device_id)
        .await
        .with_context(|| format!("Scan on {} failed", device_id))?
        .ok_or_else(|| anyhow!("Device {} produced no image data", device_id))?;

    if scan.possibly_truncated {
        warn!("Image filled the read buffer and may be truncated");
    }

    match output {
        Some(path) => {
            std::fs::write(path, &scan.bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Wrote {} bytes ({}) to {}",
                scan.bytes.len(),
                scan.media_type,
                path.display()
            );
        }
        None => println!("{}", scan.data_url()),
    }

    driver.close(device_id).await;
    Ok(())
}

/// Shutdown USB worker thread gracefully
async fn shutdown_usb_worker(usb_bridge: UsbBridge) -> Result<()> {
    usb_bridge
        .send_command(UsbCommand::Shutdown)
        .await
        .context("Failed to send Shutdown command")?;
    Ok(())
}
