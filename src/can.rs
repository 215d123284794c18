//! CAN frame bus abstraction and CANopen COB-ID arithmetic.

use crate::constants::*;
use crate::error::{McushError, Result};
use crate::types::CanFrame;

/// Raw CAN access the SDO engine runs on.
///
/// `poll` never blocks: it returns whatever frames arrived since the last
/// call, possibly none. Callers own the timeout budget.
pub trait CanBus {
    fn send(&mut self, frame: &CanFrame) -> Result<()>;
    fn poll(&mut self) -> Result<Vec<CanFrame>>;
}

impl<B: CanBus + ?Sized> CanBus for &mut B {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        (**self).send(frame)
    }

    fn poll(&mut self) -> Result<Vec<CanFrame>> {
        (**self).poll()
    }
}

impl<B: CanBus + ?Sized> CanBus for Box<B> {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        (**self).send(frame)
    }

    fn poll(&mut self) -> Result<Vec<CanFrame>> {
        (**self).poll()
    }
}

/// CiA-301 predefined connection set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FunctionCode {
    Nmt = FC_NMT,
    Sync = FC_SYNC,
    Time = FC_TIME,
    Tpdo1 = FC_TPDO1,
    Rpdo1 = FC_RPDO1,
    Tpdo2 = FC_TPDO2,
    Rpdo2 = FC_RPDO2,
    Tpdo3 = FC_TPDO3,
    Rpdo3 = FC_RPDO3,
    Tpdo4 = FC_TPDO4,
    Rpdo4 = FC_RPDO4,
    /// Server-to-client SDO
    Tsdo = FC_TSDO,
    /// Client-to-server SDO
    Rsdo = FC_RSDO,
    NodeGuard = FC_NODE_GUARD,
    Lss = FC_LSS,
}

impl FunctionCode {
    /// COB-ID of this service for `node_id`
    pub fn cob_id(self, node_id: u8) -> u32 {
        (self as u16 + (node_id & MAX_NODE_ID) as u16) as u32
    }

    /// Split a COB-ID into function code and node id
    pub fn split(cob_id: u32) -> Option<(FunctionCode, u8)> {
        if cob_id > 0x7FF {
            return None;
        }
        let code = match (cob_id as u16) & !(MAX_NODE_ID as u16) {
            FC_NMT => FunctionCode::Nmt,
            FC_SYNC => FunctionCode::Sync,
            FC_TIME => FunctionCode::Time,
            FC_TPDO1 => FunctionCode::Tpdo1,
            FC_RPDO1 => FunctionCode::Rpdo1,
            FC_TPDO2 => FunctionCode::Tpdo2,
            FC_RPDO2 => FunctionCode::Rpdo2,
            FC_TPDO3 => FunctionCode::Tpdo3,
            FC_RPDO3 => FunctionCode::Rpdo3,
            FC_TPDO4 => FunctionCode::Tpdo4,
            FC_RPDO4 => FunctionCode::Rpdo4,
            FC_TSDO => FunctionCode::Tsdo,
            FC_RSDO => FunctionCode::Rsdo,
            FC_NODE_GUARD => FunctionCode::NodeGuard,
            FC_LSS => FunctionCode::Lss,
            _ => return None,
        };
        Some((code, (cob_id as u8) & MAX_NODE_ID))
    }

    /// Transmit PDO `n` (1..=4)
    pub fn tpdo(n: u8) -> Result<FunctionCode> {
        match n {
            1 => Ok(FunctionCode::Tpdo1),
            2 => Ok(FunctionCode::Tpdo2),
            3 => Ok(FunctionCode::Tpdo3),
            4 => Ok(FunctionCode::Tpdo4),
            _ => Err(McushError::InvalidFrame(format!("no TPDO{}", n))),
        }
    }

    /// Receive PDO `n` (1..=4)
    pub fn rpdo(n: u8) -> Result<FunctionCode> {
        match n {
            1 => Ok(FunctionCode::Rpdo1),
            2 => Ok(FunctionCode::Rpdo2),
            3 => Ok(FunctionCode::Rpdo3),
            4 => Ok(FunctionCode::Rpdo4),
            _ => Err(McushError::InvalidFrame(format!("no RPDO{}", n))),
        }
    }
}

#[cfg(feature = "socketcan")]
pub use self::socket::SocketCanBus;

#[cfg(feature = "socketcan")]
mod socket {
    use super::CanBus;
    use crate::error::{McushError, Result};
    use crate::types::CanFrame;
    use log::debug;
    use socketcan::EmbeddedFrame as Frame;
    use socketcan::{CanSocket, ExtendedId, Id, Socket, StandardId};
    use std::io::ErrorKind;

    /// Linux SocketCAN interface, opened non-blocking
    pub struct SocketCanBus {
        interface: String,
        socket: CanSocket,
    }

    impl SocketCanBus {
        pub fn open(interface: &str) -> Result<Self> {
            let fault = |e: std::io::Error| McushError::Connection {
                endpoint: interface.to_string(),
                reason: e.to_string(),
            };
            let socket = CanSocket::open(interface).map_err(fault)?;
            socket.set_nonblocking(true).map_err(fault)?;
            debug!("opened CAN interface {}", interface);
            Ok(SocketCanBus {
                interface: interface.to_string(),
                socket,
            })
        }

        pub fn interface(&self) -> &str {
            &self.interface
        }
    }

    fn to_socket_frame(frame: &CanFrame) -> Result<socketcan::CanFrame> {
        let id: Id = if frame.is_extended() {
            ExtendedId::new(frame.id()).map(Id::Extended)
        } else {
            StandardId::new(frame.id() as u16).map(Id::Standard)
        }
        .ok_or_else(|| McushError::InvalidFrame(format!("id {:#x}", frame.id())))?;
        let built = if frame.is_remote() {
            socketcan::CanFrame::new_remote(id, 0)
        } else {
            socketcan::CanFrame::new(id, frame.data())
        };
        built.ok_or_else(|| McushError::InvalidFrame(format!("{:?}", frame)))
    }

    fn from_socket_frame(frame: &socketcan::CanFrame) -> Option<CanFrame> {
        if let socketcan::CanFrame::Error(_) = frame {
            return None;
        }
        let (id, extended) = match frame.id() {
            Id::Standard(id) => (id.as_raw() as u32, false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        let data: &[u8] = if frame.is_remote_frame() { &[] } else { frame.data() };
        CanFrame::build(id, extended, frame.is_remote_frame(), data).ok()
    }

    impl CanBus for SocketCanBus {
        fn send(&mut self, frame: &CanFrame) -> Result<()> {
            let raw = to_socket_frame(frame)?;
            self.socket.write_frame(&raw)?;
            Ok(())
        }

        fn poll(&mut self) -> Result<Vec<CanFrame>> {
            let mut frames = Vec::new();
            loop {
                match self.socket.read_frame() {
                    Ok(raw) => frames.extend(from_socket_frame(&raw)),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(frames)
        }
    }
}
