//! usb-rgb-bridge
//!
//! Controls the RGB LED of vendor USB devices. Devices are keyed by serial
//! number; colors are delivered as vendor control transfers framed for the
//! device's firmware generation.

mod config;
mod session;
mod usb;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use common::{UsbBridge, create_usb_bridge, setup_logging};
use config::BridgeConfig;
use protocol::Rgb;
use tokio::signal;
use tracing::{error, info, warn};
use usb::spawn_usb_worker;

#[derive(Parser, Debug)]
#[command(name = "usb-rgb-bridge")]
#[command(author, version, about = "Bridge between callers and USB RGB devices")]
#[command(long_about = "
Opens USB RGB devices, keeps a registry keyed by serial number and sets
LED colors on request.

EXAMPLES:
    # Serve the framed protocol on stdin/stdout
    usb-rgb-bridge

    # List connected devices as JSON
    usb-rgb-bridge list --json

    # Set a device to orange
    usb-rgb-bridge set-color SN000123 255 128 0

CONFIGURATION:
    The bridge looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-rgb-bridge/bridge.toml
    3. /etc/usb-rgb-bridge/bridge.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the framed protocol on stdin/stdout (default)
    Serve,

    /// Connect all devices and print them
    List {
        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect one device and set its color
    SetColor {
        /// Serial number of the device
        serial_number: String,
        /// Red component (0-255)
        #[arg(allow_negative_numbers = true)]
        r: i32,
        /// Green component (0-255)
        #[arg(allow_negative_numbers = true)]
        g: i32,
        /// Blue component (0-255)
        #[arg(allow_negative_numbers = true)]
        b: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = BridgeConfig::default();
        let path = BridgeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        BridgeConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        BridgeConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.bridge.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-rgb-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let (usb_bridge, worker) = create_usb_bridge();
    let usb_worker_handle =
        spawn_usb_worker(worker, config.worker_settings()).context("Failed to spawn USB worker")?;

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(&config, usb_bridge.clone()).await,
        Command::List { json } => list_devices_mode(usb_bridge.clone(), json).await,
        Command::SetColor {
            serial_number,
            r,
            g,
            b,
        } => set_color_mode(usb_bridge.clone(), serial_number, r, g, b).await,
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = usb_bridge.shutdown().await {
        // Worker already gone, typically because the transport failed to start
        warn!("Error shutting down USB worker: {:#}", e);
    }
    drop(usb_bridge);

    let worker_result = match usb_worker_handle.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("USB worker failed: {}", e);
            Err(anyhow!(e).context("USB worker failed"))
        }
        Err(e) => {
            error!("USB worker thread panicked: {:?}", e);
            Err(anyhow!("USB worker thread panicked"))
        }
    };

    result.and(worker_result)
}

/// Serve one caller over stdin/stdout until input ends or Ctrl+C
async fn run_serve(config: &BridgeConfig, usb_bridge: UsbBridge) -> Result<()> {
    if config.usb.connect_on_start {
        // A dead worker is reported to the caller per request
        match usb_bridge.connect_all().await {
            Ok(Ok(report)) => info!(
                "Opened {} devices at startup, {} failed",
                report.opened.len(),
                report.failed.len()
            ),
            Ok(Err(e)) => warn!("Initial connect failed: {}", e),
            Err(e) => warn!("USB worker unavailable: {}", e),
        }
    }

    let session = session::run_session(tokio::io::stdin(), tokio::io::stdout(), usb_bridge);

    tokio::select! {
        result = session => result,
        signal = signal::ctrl_c() => {
            signal.context("Error waiting for Ctrl+C")?;
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}

/// Connect all devices, print them and exit
async fn list_devices_mode(usb_bridge: UsbBridge, json: bool) -> Result<()> {
    let report = usb_bridge
        .connect_all()
        .await
        .context("USB worker unavailable")??;

    for failure in &report.failed {
        warn!("{}", failure);
    }

    let devices = usb_bridge
        .list_devices()
        .await
        .context("Failed to receive device list")?;

    if json {
        let output =
            serde_json::to_string_pretty(&devices).context("Failed to serialize device list")?;
        println!("{}", output);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No RGB devices found.");
        return Ok(());
    }

    println!("Found {} device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {} {:04x}:{:04x} - {}",
            device.serial_number,
            device.vendor_id,
            device.product_id,
            device.product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Bus {:03} Device {:03} Firmware v{} {}",
            device.bus_number,
            device.device_address,
            device.usb_version_major,
            if device.is_open { "open" } else { "not open" }
        );
    }

    Ok(())
}

/// Connect one device, set its color and exit
async fn set_color_mode(
    usb_bridge: UsbBridge,
    serial_number: String,
    r: i32,
    g: i32,
    b: i32,
) -> Result<()> {
    let color = Rgb::from_components(r, g, b)?;

    usb_bridge
        .connect_device(serial_number.clone())
        .await
        .context("USB worker unavailable")?
        .with_context(|| format!("Failed to connect {}", serial_number))?;

    usb_bridge
        .set_color(serial_number.clone(), color)
        .await
        .context("USB worker unavailable")??;

    info!(
        "Set {} to #{:02x}{:02x}{:02x}",
        serial_number, color.r, color.g, color.b
    );
    Ok(())
}
