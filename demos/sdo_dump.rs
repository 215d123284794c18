//! SDO Dump Example
//!
//! Reads the CiA-301 identity objects of one CANopen node over SocketCAN:
//! - Device type (0x1000), device name (0x1008), versions (0x1009/0x100A)
//! - Identity record 0x1018 sub 1..4
//! - Node guarding of the node state
//!
//! Usage:
//!   cargo run --example sdo_dump --features socketcan -- can0 5
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example sdo_dump --features socketcan -- can0 5

use log::{error, info};
use mcush_protocol::canopen::{self, NodeState};
use mcush_protocol::{CanBus, FunctionCode, McushError, Result, SdoClient, SocketCanBus};
use std::thread;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let interface = args.next().unwrap_or_else(|| "can0".to_string());
    let node: u8 = match args.next() {
        Some(n) => n
            .parse()
            .map_err(|_| McushError::Config(format!("bad node id {:?}", n)))?,
        None => 1,
    };

    let bus = SocketCanBus::open(&interface)?;
    let mut sdo = SdoClient::new(bus).with_timeout(Duration::from_secs(1));

    info!("=== Node {} on {} ===", node, interface);
    match sdo.read_value::<u32>(node, 0x1000, 0) {
        Ok(device_type) => info!("Device type: {:#010x}", device_type),
        Err(e) => {
            error!("Node {} does not answer: {}", node, e);
            return Ok(());
        }
    }
    for (index, label) in [
        (0x1008, "Device name"),
        (0x1009, "Hardware version"),
        (0x100A, "Software version"),
    ] {
        match sdo.read_string(node, index, 0) {
            Ok(text) => info!("{}: {}", label, text),
            Err(e) => info!("{}: {}", label, e),
        }
    }
    for (sub, label) in [(1, "Vendor ID"), (2, "Product code"), (3, "Revision"), (4, "Serial")] {
        match sdo.read_value::<u32>(node, 0x1018, sub) {
            Ok(value) => info!("{}: {:#010x}", label, value),
            Err(e) => info!("{}: {}", label, e),
        }
    }

    info!("=== Node guarding ===");
    let bus = sdo.bus_mut();
    canopen::request_node_guard(&mut *bus, node)?;
    thread::sleep(Duration::from_millis(100));
    let guard_id = FunctionCode::NodeGuard.cob_id(node);
    for frame in bus.poll()? {
        if frame.id() == guard_id && !frame.is_remote() {
            if let Some(&state) = frame.data().first() {
                info!("State: {:?}", NodeState::from_guard(state));
            }
        }
    }
    Ok(())
}
