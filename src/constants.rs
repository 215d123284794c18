//! Protocol constants for MCUSH shell and CANopen communication.
//!
//! This module defines the line terminators, prompt patterns and timing
//! defaults of the shell protocol, and the CiA-301 function codes and SDO
//! command-byte layout used by the CANopen side.

use std::time::Duration;

/// Terminator appended to every command
pub const TERMINATOR_WRITE: u8 = b'\n';

/// Terminator ending every response line
pub const TERMINATOR_READ: u8 = b'\n';

/// Ctrl-C, sent on connect to clear a half-typed command line
pub const TERMINATOR_RESET: u8 = 0x03;

/// Default per-byte read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Prompts closing a response: `=>`/`#>` ok, `?>` syntax error, `!>` execute error
pub const DEFAULT_PROMPTS: &str = "[=#?!]>";

/// Reconnect attempts after `reboot` before giving up
pub const DEFAULT_REBOOT_RETRY: u32 = 10;

/// Pause between reconnect attempts after `reboot`
pub const DEFAULT_REBOOT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Settle time after a successful reboot
pub const DEFAULT_REBOOT_DELAY: Duration = Duration::from_secs(1);

/// Attempts made by `write_command_retry` when none is given
pub const DEFAULT_COMMAND_RETRY: u32 = 3;

/// Prompt line reported for a syntax error
pub const PROMPT_SYNTAX: &str = "?>";

/// Bare `?` also reports a syntax error
pub const PROMPT_SYNTAX_BARE: &str = "?";

/// Prompt line reported for an execution error
pub const PROMPT_EXECUTE: &str = "!>";

/// Identity query
pub const CMD_IDN: &str = "*idn?";

/// Instrument reset
pub const CMD_RST: &str = "*rst";

/// CPU reboot
pub const CMD_REBOOT: &str = "reboot";

/// Identity of a generic MCUSH shell
pub const IDN_MCUSH: &str = r"mcush[0-9a-zA-Z\-]*,([0-9]+\.[0-9]+.*)";

/// Identity of a ShellLab DAQ/measurement board
pub const IDN_SHELL_LAB: &str = r"ShellLab(-[A-Z][0-9a-zA-Z\-]*)?,([0-9]+\.[0-9]+.*)";

/// Identity of a ShellLab lamp
pub const IDN_SHELL_LAB_LAMP: &str = r"ShellLab-L1[a-zA-Z]*,([0-9]+\.[0-9]+.*)";

/// Identity of a ShellLab LED strap
pub const IDN_SHELL_LAB_STRAP: &str = r"ShellLab-L2[a-zA-Z]*,([0-9]+\.[0-9]+.*)";

/// Identity of a ShellLab CAN adapter
pub const IDN_SHELL_LAB_CAN: &str = r"ShellLab-C[0-9a-zA-Z\-]*,([0-9]+\.[0-9]+.*)";

// CANopen function codes (COB-ID = function code + node id)
pub const FC_NMT: u16 = 0x0 << 7;
pub const FC_SYNC: u16 = 0x1 << 7;
pub const FC_TIME: u16 = 0x2 << 7;
pub const FC_TPDO1: u16 = 0x3 << 7;
pub const FC_RPDO1: u16 = 0x4 << 7;
pub const FC_TPDO2: u16 = 0x5 << 7;
pub const FC_RPDO2: u16 = 0x6 << 7;
pub const FC_TPDO3: u16 = 0x7 << 7;
pub const FC_RPDO3: u16 = 0x8 << 7;
pub const FC_TPDO4: u16 = 0x9 << 7;
pub const FC_RPDO4: u16 = 0xA << 7;
pub const FC_TSDO: u16 = 0xB << 7;
pub const FC_RSDO: u16 = 0xC << 7;
pub const FC_NODE_GUARD: u16 = 0xE << 7;
pub const FC_LSS: u16 = 0xF << 7;

/// Highest CANopen node id
pub const MAX_NODE_ID: u8 = 0x7F;

/// SDO response wait budget
pub const DEFAULT_SDO_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between non-blocking bus polls
pub const DEFAULT_SDO_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// SDO frames always carry 8 data bytes
pub const SDO_FRAME_LEN: usize = 8;

/// Payload bytes of one SDO segment
pub const SDO_SEGMENT_PAYLOAD: usize = 7;

/// Largest expedited payload
pub const SDO_EXPEDITED_MAX: usize = 4;

// SDO command byte, bits 7..5 are the command specifier
pub const SDO_CS_MASK: u8 = 0xE0;
pub const SDO_CCS_DOWNLOAD_SEGMENT: u8 = 0x00;
pub const SDO_CCS_INITIATE_DOWNLOAD: u8 = 0x20;
pub const SDO_CCS_INITIATE_UPLOAD: u8 = 0x40;
pub const SDO_CCS_UPLOAD_SEGMENT: u8 = 0x60;
pub const SDO_SCS_INITIATE_UPLOAD: u8 = 0x40;
pub const SDO_SCS_INITIATE_DOWNLOAD: u8 = 0x60;
pub const SDO_ABORT: u8 = 0x80;

/// Toggle bit of segment frames
pub const SDO_TOGGLE: u8 = 0x10;

/// Initiate frames: payload is inline
pub const SDO_EXPEDITED: u8 = 0x02;

/// Initiate frames: size (or not-used count) is valid
pub const SDO_SIZE_INDICATED: u8 = 0x01;

/// Segment frames: last segment
pub const SDO_NO_MORE: u8 = 0x01;

// NMT commands
pub const NMT_START: u8 = 0x01;
pub const NMT_STOP: u8 = 0x02;
pub const NMT_PRE_OPERATIONAL: u8 = 0x80;
pub const NMT_RESET: u8 = 0x81;
pub const NMT_RESET_COMMUNICATION: u8 = 0x82;

// Node states reported by heartbeat / node guarding
pub const STATUS_BOOT_UP: u8 = 0x00;
pub const STATUS_CONNECTING: u8 = 0x02;
pub const STATUS_STOPPED: u8 = 0x04;
pub const STATUS_OPERATIONAL: u8 = 0x05;
pub const STATUS_PRE_OPERATIONAL: u8 = 0x7F;
