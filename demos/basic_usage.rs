//! Basic Usage Example
//!
//! Connects to an MCUSH instrument and walks through the shell protocol:
//! - Listing and selecting serial ports (or a `tcp://host:port` endpoint)
//! - Identity query, with the result exported as JSON
//! - Plain commands, error prompts and bounded retry
//!
//! Usage:
//!   cargo run --example basic_usage                       # Interactive mode
//!   cargo run --example basic_usage -- /dev/ttyUSB0
//!   cargo run --example basic_usage -- tcp://192.168.1.20:2000
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example basic_usage     # shows [T]/[R] lines

use inquire::Select;
use log::{info, warn};
use mcush_protocol::{
    CommandChannel, InstrumentConfig, InstrumentProfile, McushError, Result, SerialTransport,
};

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = SerialTransport::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| McushError::Config(format!("Selection cancelled: {}", e)))?;

    // Extract just the port name (before " - ")
    Ok(selection
        .split(" - ")
        .next()
        .unwrap_or(&selection)
        .to_string())
}

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port = match std::env::args().nth(1) {
        Some(port) => port,
        None => select_port()?,
    };

    info!("Connecting to {}...", port);
    let config = InstrumentConfig::builder().port(port).build()?;
    let mut mcush = CommandChannel::open(config, InstrumentProfile::MCUSH)?;

    info!("=== Identity ===");
    let identity = mcush.scpi_idn(true)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&identity).map_err(|e| McushError::Parse(e.to_string()))?
    );
    match mcush.reboot_counter() {
        Ok(count) => info!("Reboot counter: {}", count),
        Err(e) => warn!("Reboot counter not available: {}", e),
    }

    info!("=== Commands ===");
    for line in mcush.write_command("uptime")? {
        println!("  {}", line);
    }

    // an unknown command comes back with the syntax-error prompt
    if let Err(e) = mcush.write_command("no_such_command") {
        info!("Expected failure: {}", e);
    }

    let ret = mcush.write_command_retry("*idn?", None)?;
    info!("With retry: {:?}", ret);

    mcush.disconnect();
    info!("=== Basic Usage Complete ===");
    Ok(())
}
