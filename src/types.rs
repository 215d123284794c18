use crate::constants::*;
use crate::error::{McushError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Outcome class of the prompt line closing a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptClass {
    Ok,
    Syntax,
    Execute,
}

impl PromptClass {
    /// Classify a terminal line. Anything that is not an error marker is `Ok`.
    pub fn classify(prompt: &str) -> Self {
        match prompt.trim() {
            PROMPT_SYNTAX | PROMPT_SYNTAX_BARE => PromptClass::Syntax,
            PROMPT_EXECUTE => PromptClass::Execute,
            _ => PromptClass::Ok,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl FromStr for Parity {
    type Err = McushError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" | "NONE" => Ok(Parity::None),
            "E" | "EVEN" => Ok(Parity::Even),
            "O" | "ODD" => Ok(Parity::Odd),
            _ => Err(McushError::Config(format!("unknown parity {:?}", s))),
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

/// Parsed answer to `*idn?`
///
/// ```text
/// =>*idn?
/// mcush,1.1          --- model, version
/// NNNNNNNNNNNNNNNN   --- serial number (if exists)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub idn: String,
    pub serial_number: Option<String>,
}

impl Identity {
    pub fn model(&self) -> &str {
        self.idn.split(',').next().unwrap_or("")
    }

    pub fn version(&self) -> &str {
        self.idn.split(',').nth(1).unwrap_or("")
    }
}

/// Raw CAN frame `(id, extended, rtr, data[0..8])`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    rtr: bool,
    len: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// Standard (11-bit) data frame
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        Self::build(id, false, false, data)
    }

    /// Extended (29-bit) data frame
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self> {
        Self::build(id, true, false, data)
    }

    /// Standard remote-transmission request
    pub fn new_remote(id: u32) -> Result<Self> {
        Self::build(id, false, true, &[])
    }

    pub fn build(id: u32, extended: bool, rtr: bool, data: &[u8]) -> Result<Self> {
        let max_id = if extended { 0x1FFF_FFFF } else { 0x7FF };
        if id > max_id {
            return Err(McushError::InvalidFrame(format!("id {:#x} out of range", id)));
        }
        if data.len() > 8 {
            return Err(McushError::InvalidFrame(format!(
                "{} data bytes (max 8)",
                data.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Ok(CanFrame {
            id,
            extended,
            rtr,
            len: data.len() as u8,
            data: buf,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn is_remote(&self) -> bool {
        self.rtr
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// One object-dictionary entry on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SdoObjectRef {
    node_id: u8,
    pub index: u16,
    pub subindex: u8,
}

impl SdoObjectRef {
    pub fn new(node_id: u8, index: u16, subindex: u8) -> Result<Self> {
        if node_id == 0 || node_id > MAX_NODE_ID {
            return Err(McushError::InvalidNodeId(node_id));
        }
        Ok(SdoObjectRef {
            node_id,
            index,
            subindex,
        })
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// COB-ID the client sends requests on
    pub fn request_id(&self) -> u32 {
        (FC_RSDO + self.node_id as u16) as u32
    }

    /// COB-ID the node answers on
    pub fn response_id(&self) -> u32 {
        (FC_TSDO + self.node_id as u16) as u32
    }

    /// Whether bytes 1..4 of an SDO frame address this entry
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= 4
            && u16::from_le_bytes([data[1], data[2]]) == self.index
            && data[3] == self.subindex
    }
}

/// How an SDO payload travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoTransferMode {
    /// 1..=4 bytes inline in the initiate frame
    Expedited { len: u8 },
    /// Continuation frames of 7 bytes each; `None` when the server did not indicate a size
    Segmented { total_len: Option<u32> },
}

impl SdoTransferMode {
    /// Mode a writer uses for a payload of `len` bytes
    pub fn for_payload(len: usize) -> Result<Self> {
        if len <= SDO_EXPEDITED_MAX {
            Ok(SdoTransferMode::Expedited { len: len as u8 })
        } else {
            let total_len = u32::try_from(len).map_err(|_| McushError::PayloadTooLarge(len))?;
            Ok(SdoTransferMode::Segmented {
                total_len: Some(total_len),
            })
        }
    }
}

/// Segment toggle bit. Starts at 0 and flips after every acknowledged segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentToggle(bool);

impl SegmentToggle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bit as it sits in a command byte
    pub fn bits(&self) -> u8 {
        if self.0 {
            SDO_TOGGLE
        } else {
            0
        }
    }

    pub fn is_set(&self) -> bool {
        self.0
    }

    pub fn flip(&mut self) {
        self.0 = !self.0;
    }

    /// Whether a response command byte carries the expected toggle
    pub fn matches(&self, control: u8) -> bool {
        (control & SDO_TOGGLE) == self.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_classes() {
        assert_eq!(PromptClass::classify("=>"), PromptClass::Ok);
        assert_eq!(PromptClass::classify("#>"), PromptClass::Ok);
        assert_eq!(PromptClass::classify("?>"), PromptClass::Syntax);
        assert_eq!(PromptClass::classify("?"), PromptClass::Syntax);
        assert_eq!(PromptClass::classify("!> "), PromptClass::Execute);
    }

    #[test]
    fn parity_parses_letters_and_words() {
        assert_eq!("E".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!(" odd ".parse::<Parity>().unwrap(), Parity::Odd);
        assert_eq!("none".parse::<Parity>().unwrap(), Parity::None);
        assert!(matches!("M".parse::<Parity>(), Err(McushError::Config(_))));
    }

    #[test]
    fn node_id_range() {
        assert!(SdoObjectRef::new(0, 0x1000, 0).is_err());
        assert!(SdoObjectRef::new(0x80, 0x1000, 0).is_err());
        let obj = SdoObjectRef::new(5, 0x2100, 1).unwrap();
        assert_eq!(obj.request_id(), 0x605);
        assert_eq!(obj.response_id(), 0x585);
    }

    #[test]
    fn frame_limits() {
        assert!(CanFrame::new(0x800, &[]).is_err());
        assert!(CanFrame::new(0x100, &[0; 9]).is_err());
        assert!(CanFrame::new_extended(0x1234_5678, &[1, 2]).is_ok());
        let frame = CanFrame::new(0x605, &[1, 2, 3]).unwrap();
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert!(!frame.is_remote());
    }

    #[test]
    fn toggle_alternates() {
        let mut toggle = SegmentToggle::new();
        assert!(toggle.matches(0x60));
        assert!(!toggle.matches(0x70));
        toggle.flip();
        assert_eq!(toggle.bits(), 0x10);
        assert!(toggle.matches(0x30));
    }

    #[test]
    fn transfer_mode_by_length() {
        assert_eq!(
            SdoTransferMode::for_payload(4).unwrap(),
            SdoTransferMode::Expedited { len: 4 }
        );
        assert_eq!(
            SdoTransferMode::for_payload(5).unwrap(),
            SdoTransferMode::Segmented { total_len: Some(5) }
        );
    }
}
