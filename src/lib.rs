//! # MCUSH Protocol Library
//!
//! A Rust library for talking to MCUSH shell instruments over a serial port
//! or TCP socket, and to CANopen nodes through SDO transfers.
//!
//! ## Features
//!
//! - Prompt-framed command/response exchange with echo and prompt checks
//! - Bounded command retry, identity queries and reboot with reconnection
//! - CANopen SDO upload/download, expedited and segmented
//! - NMT, SYNC, node-guard and PDO frame helpers
//! - Shell Lab instrument families (DAQ, measurement, lamp, LED strap)
//!
//! ## Example
//!
//! ```no_run
//! use mcush_protocol::{CommandChannel, InstrumentConfig, InstrumentProfile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = InstrumentConfig::builder().port("/dev/ttyUSB0").build()?;
//!     let mut mcush = CommandChannel::open(config, InstrumentProfile::MCUSH)?;
//!     println!("IDN: {}", mcush.scpi_idn(true)?.idn);
//!     for line in mcush.write_command("uptime")? {
//!         println!("{}", line);
//!     }
//!     Ok(())
//! }
//! ```

pub mod can;
pub mod canopen;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod framer;
pub mod sdo;
pub mod shell_lab;
pub mod transport;
pub mod types;

pub use can::{CanBus, FunctionCode};
pub use channel::{CommandChannel, InstrumentProfile};
pub use config::{ConfigBuilder, EndpointConfig, InstrumentConfig};
pub use error::{McushError, Result};
pub use framer::LineFramer;
pub use sdo::{ObjectValue, SdoClient};
pub use transport::{open_transport, SerialTransport, SocketTransport, Transport};
pub use types::*;

#[cfg(feature = "socketcan")]
pub use can::SocketCanBus;
