//! cdc-link CLI
//!
//! Talks to a USB-CDC microcontroller over single-byte command/echo
//! exchanges: connect, send the requested bytes, read back their echoes,
//! and report the round-trip latency.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use link::usb::{LibusbHost, UsbHost};
use link::{ConnectOutcome, LinkConfig, LinkController, LinkEvent};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cdc-link")]
#[command(
    author,
    version,
    about = "Exchange single-byte commands with a USB-CDC microcontroller"
)]
#[command(long_about = "
Connects to a USB-CDC (virtual serial) microcontroller, sends single-byte
commands, and reads back the device's echo/status bytes.

EXAMPLES:
    # List attached USB devices
    cdc-link --list-devices

    # Toggle the LED on and read the echoed status
    cdc-link --send ff

    # Send several command bytes in sequence
    cdc-link --send 00 --send ff --send 2a

    # Target a different device than the configured one
    cdc-link --vid 16c0 --pid 0483 --send 01

CONFIGURATION:
    The tool looks for configuration in the following order:
    1. Path specified with --config
    2. ~/.config/cdc-link/link.toml
    3. Built-in defaults (Arduino Uno, 9600 8N1)
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// List attached USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Vendor ID of the target device (hex)
    #[arg(long, value_parser = parse_hex_u16, value_name = "VID")]
    vid: Option<u16>,

    /// Product ID of the target device (hex)
    #[arg(long, value_parser = parse_hex_u16, value_name = "PID")]
    pid: Option<u16>,

    /// Byte to send (hex); may be given multiple times, each send is
    /// followed by an echo read
    #[arg(long, value_parser = parse_hex_u8, value_name = "BYTE")]
    send: Vec<u8>,
}

fn parse_hex_u16(s: &str) -> std::result::Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn parse_hex_u8(s: &str) -> std::result::Result<u8, String> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config before anything touches the config file
    if args.save_config {
        let config = LinkConfig::default();
        let path = LinkConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        LinkConfig::load(path).context("Failed to load configuration")?
    } else {
        LinkConfig::load_or_default()
    };

    if let Some(vid) = args.vid {
        config.device.vendor_id = vid;
    }
    if let Some(pid) = args.pid {
        config.device.product_id = pid;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("cdc-link v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices_mode();
    }

    let controller = LinkController::new(config).context("Failed to initialize USB host")?;

    // Surface link notifications as log lines
    let events = controller.events();
    std::thread::spawn(move || {
        while let Ok(event) = events.recv_blocking() {
            match event {
                LinkEvent::UsbStopped => info!("link stopped"),
                LinkEvent::AlreadyRunning => warn!("connect attempted while already running"),
                LinkEvent::DeviceNotFound {
                    vendor_id,
                    product_id,
                } => warn!("no device matching {:04x}:{:04x}", vendor_id, product_id),
                LinkEvent::PermissionDenied { device } => {
                    warn!("permission denied for {}", device)
                }
            }
        }
    });

    match controller.connect().context("Connection attempt failed")? {
        ConnectOutcome::Connected => {}
        ConnectOutcome::PermissionPending => {
            info!("waiting for the permission prompt to be answered");
        }
    }

    for byte in &args.send {
        controller.send(*byte).context("Send failed")?;
        let echo = controller.receive().context("Receive failed")?;

        match echo.first() {
            Some(status) => {
                let latency = controller
                    .timings()
                    .latency()
                    .map(|d| format!("{} ms", d.as_millis()))
                    .unwrap_or_else(|| "unknown".to_string());
                println!("sent {:#04x}, echo {:#04x}, latency {}", byte, status, latency);
            }
            None => println!("sent {:#04x}, no echo received", byte),
        }
    }

    controller.stop().context("Stop failed")?;
    Ok(())
}

fn list_devices_mode() -> Result<()> {
    let host = LibusbHost::new().context("Failed to initialize USB host")?;
    let devices = host.list_devices().context("Failed to enumerate devices")?;

    if devices.is_empty() {
        println!("No USB devices found");
        return Ok(());
    }

    println!("Attached USB devices:");
    for device in devices {
        println!("  {}", device);
    }
    Ok(())
}
