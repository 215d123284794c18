//! Error types for MCUSH shell and CANopen SDO operations.

use thiserror::Error;

/// Result type alias for MCUSH operations.
pub type Result<T> = std::result::Result<T, McushError>;

/// Error types for instrument and CANopen communication.
#[derive(Error, Debug)]
pub enum McushError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Port could not be opened or failed underneath us
    #[error("Connection error on {endpoint}: {reason}")]
    Connection {
        /// Port path or socket address
        endpoint: String,
        /// What went wrong
        reason: String,
    },

    /// Echoed command line differs from what was sent
    #[error("Command {sent:?}, but returned {returned:?}")]
    Response {
        /// Command as written to the device
        sent: String,
        /// First line the device sent back
        returned: String,
    },

    /// Device answered with the syntax-error prompt
    #[error("Command syntax error: {}", describe(.command, .detail))]
    CommandSyntax {
        /// Echoed command
        command: String,
        /// Lines between echo and prompt
        detail: Vec<String>,
    },

    /// Device answered with the execute-error prompt
    #[error("Command execute error: {}", describe(.command, .detail))]
    CommandExecute {
        /// Echoed command
        command: String,
        /// Lines between echo and prompt
        detail: Vec<String>,
    },

    /// No terminal prompt before the read timeout
    #[error("Command timeout: {}", timeout_text(.command, .partial))]
    CommandTimeout {
        /// Command that was waiting, if known
        command: Option<String>,
        /// Text captured before the timeout, lines joined by `" | "`
        partial: Option<String>,
    },

    /// Identity string does not match the expected pattern
    #[error("Identity mismatch: model {model:?} (idn {idn:?})")]
    IdentityMismatch {
        /// First comma-separated token of the identity
        model: String,
        /// Full identity line
        idn: String,
    },

    /// Command succeeded but produced no payload where one was required
    #[error("Empty response to {command:?}")]
    EmptyResponse {
        /// Command that was sent
        command: String,
    },

    /// No matching SDO response within the timeout
    #[error("SDO timeout on node {node} {index:#06x}:{subindex:#04x} ({stage})")]
    SdoTimeout {
        /// Node id
        node: u8,
        /// Object index
        index: u16,
        /// Object subindex
        subindex: u8,
        /// Which wait ran out
        stage: &'static str,
    },

    /// Peer aborted the SDO transfer
    #[error("SDO abort on node {node} {index:#06x}:{subindex:#04x}: {code:#010x} {description}")]
    SdoAbort {
        /// Node id
        node: u8,
        /// Object index
        index: u16,
        /// Object subindex
        subindex: u8,
        /// CiA-301 abort code
        code: u32,
        /// Human-readable abort reason
        description: String,
    },

    /// CANopen node ids are 1..=127
    #[error("Invalid node id: {0}")]
    InvalidNodeId(u8),

    /// Frame cannot be represented on the bus
    #[error("Invalid CAN frame: {0}")]
    InvalidFrame(String),

    /// SDO payload exceeds the 32-bit size field
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Prompt or identity pattern failed to compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Configuration value could not be resolved
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data parsing error
    #[error("Parse error: {0}")]
    Parse(String),
}

impl McushError {
    /// True for the two timeout kinds.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimeout { .. } | Self::SdoTimeout { .. })
    }

    /// True when the port itself is the problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::SerialPort(_) | Self::Io(_))
    }

    /// Attach the command being waited on to a timeout raised by the framer.
    pub(crate) fn with_command(self, cmd: &str) -> Self {
        match self {
            Self::CommandTimeout { command: None, partial } => Self::CommandTimeout {
                command: Some(cmd.to_string()),
                partial,
            },
            other => other,
        }
    }
}

fn describe(command: &str, detail: &[String]) -> String {
    if detail.is_empty() {
        command.to_string()
    } else {
        format!("{}, returns: {}", command, detail.join(","))
    }
}

fn timeout_text(command: &Option<String>, partial: &Option<String>) -> String {
    let partial = partial.as_deref().unwrap_or("No response");
    match command {
        Some(cmd) => format!("{} (waiting on {:?})", partial, cmd),
        None => partial.to_string(),
    }
}
