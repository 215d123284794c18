//! CANopen master services besides SDO: NMT, SYNC, node guarding and PDOs.
//!
//! These are single fire-and-forget frames; only node guarding has an
//! answer, which the caller picks up from the bus and decodes with
//! [`NodeState::from_guard`].

use crate::can::{CanBus, FunctionCode};
use crate::constants::*;
use crate::error::{McushError, Result};
use crate::types::CanFrame;
use log::debug;

/// NMT command specifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtCommand {
    Start = NMT_START,
    Stop = NMT_STOP,
    PreOperational = NMT_PRE_OPERATIONAL,
    Reset = NMT_RESET,
    ResetCommunication = NMT_RESET_COMMUNICATION,
}

/// Node state reported in heartbeat and node-guard responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    BootUp,
    Connecting,
    Stopped,
    Operational,
    PreOperational,
}

impl NodeState {
    /// Decode the state byte, ignoring the guard toggle in bit 7.
    pub fn from_guard(byte: u8) -> Option<NodeState> {
        match byte & 0x7F {
            STATUS_BOOT_UP => Some(NodeState::BootUp),
            STATUS_CONNECTING => Some(NodeState::Connecting),
            STATUS_STOPPED => Some(NodeState::Stopped),
            STATUS_OPERATIONAL => Some(NodeState::Operational),
            STATUS_PRE_OPERATIONAL => Some(NodeState::PreOperational),
            _ => None,
        }
    }
}

fn check_node(node: u8) -> Result<u8> {
    if node > MAX_NODE_ID {
        return Err(McushError::InvalidNodeId(node));
    }
    Ok(node)
}

/// Broadcast SYNC
pub fn sync<B: CanBus + ?Sized>(bus: &mut B) -> Result<()> {
    bus.send(&CanFrame::new(FunctionCode::Sync.cob_id(0), &[])?)
}

/// Send an NMT command to `node`; node 0 addresses every node.
pub fn send_nmt<B: CanBus + ?Sized>(bus: &mut B, command: NmtCommand, node: u8) -> Result<()> {
    let node = check_node(node)?;
    debug!("NMT {:?} -> node {}", command, node);
    bus.send(&CanFrame::new(FunctionCode::Nmt.cob_id(0), &[command as u8, node])?)
}

pub fn start_node<B: CanBus + ?Sized>(bus: &mut B, node: u8) -> Result<()> {
    send_nmt(bus, NmtCommand::Start, node)
}

pub fn stop_node<B: CanBus + ?Sized>(bus: &mut B, node: u8) -> Result<()> {
    send_nmt(bus, NmtCommand::Stop, node)
}

pub fn pre_operational_node<B: CanBus + ?Sized>(bus: &mut B, node: u8) -> Result<()> {
    send_nmt(bus, NmtCommand::PreOperational, node)
}

pub fn reset_node<B: CanBus + ?Sized>(bus: &mut B, node: u8) -> Result<()> {
    send_nmt(bus, NmtCommand::Reset, node)
}

pub fn reset_communication<B: CanBus + ?Sized>(bus: &mut B, node: u8) -> Result<()> {
    send_nmt(bus, NmtCommand::ResetCommunication, node)
}

/// Remote request on the node-guard identifier of `node`
pub fn request_node_guard<B: CanBus + ?Sized>(bus: &mut B, node: u8) -> Result<()> {
    let node = check_node(node)?;
    bus.send(&CanFrame::new_remote(FunctionCode::NodeGuard.cob_id(node))?)
}

/// Write receive PDO `n` (1..=4) of `node`; at most 8 bytes.
pub fn write_rpdo<B: CanBus + ?Sized>(bus: &mut B, n: u8, node: u8, data: &[u8]) -> Result<()> {
    let node = check_node(node)?;
    let id = FunctionCode::rpdo(n)?.cob_id(node);
    bus.send(&CanFrame::new(id, data)?)
}

/// Remote request for transmit PDO `n` (1..=4) of `node`
pub fn request_tpdo<B: CanBus + ?Sized>(bus: &mut B, n: u8, node: u8) -> Result<()> {
    let node = check_node(node)?;
    let id = FunctionCode::tpdo(n)?.cob_id(node);
    bus.send(&CanFrame::new_remote(id)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<CanFrame>);

    impl CanBus for Recorder {
        fn send(&mut self, frame: &CanFrame) -> Result<()> {
            self.0.push(*frame);
            Ok(())
        }

        fn poll(&mut self) -> Result<Vec<CanFrame>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn nmt_frames() {
        let mut bus = Recorder::default();
        start_node(&mut bus, 5).unwrap();
        reset_communication(&mut bus, 0).unwrap();
        assert_eq!(bus.0[0].id(), 0);
        assert_eq!(bus.0[0].data(), &[0x01, 0x05]);
        assert_eq!(bus.0[1].data(), &[0x82, 0x00]);
        assert!(stop_node(&mut bus, 0x80).is_err());
    }

    #[test]
    fn sync_and_guard() {
        let mut bus = Recorder::default();
        sync(&mut bus).unwrap();
        request_node_guard(&mut bus, 3).unwrap();
        assert_eq!(bus.0[0].id(), 0x80);
        assert!(bus.0[0].data().is_empty());
        assert_eq!(bus.0[1].id(), 0x703);
        assert!(bus.0[1].is_remote());
    }

    #[test]
    fn pdo_frames() {
        let mut bus = Recorder::default();
        write_rpdo(&mut bus, 2, 4, &[1, 2, 3]).unwrap();
        request_tpdo(&mut bus, 1, 4).unwrap();
        assert_eq!(bus.0[0].id(), 0x304);
        assert_eq!(bus.0[0].data(), &[1, 2, 3]);
        assert_eq!(bus.0[1].id(), 0x184);
        assert!(bus.0[1].is_remote());
        assert!(write_rpdo(&mut bus, 1, 4, &[0; 9]).is_err());
        assert!(request_tpdo(&mut bus, 0, 4).is_err());
    }

    #[test]
    fn guard_state_ignores_toggle() {
        assert_eq!(NodeState::from_guard(0x85), Some(NodeState::Operational));
        assert_eq!(NodeState::from_guard(0x7F), Some(NodeState::PreOperational));
        assert_eq!(NodeState::from_guard(0x01), None);
    }
}
