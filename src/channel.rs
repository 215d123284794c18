use crate::config::InstrumentConfig;
use crate::constants::*;
use crate::error::{McushError, Result};
use crate::framer::{self, compile_anchored, LineFramer};
use crate::transport::{open_transport, Transport};
use crate::types::{ConnectionState, Identity, PromptClass};
use log::{debug, info, warn};
use regex::Regex;
use std::thread;
use std::time::{Duration, Instant};

/// Name and identity pattern of one instrument family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentProfile {
    pub name: &'static str,
    /// Pattern `*idn?` must match; `None` skips the check
    pub idn: Option<&'static str>,
}

impl InstrumentProfile {
    /// Any shell speaking the prompt protocol
    pub const GENERIC: InstrumentProfile = InstrumentProfile {
        name: "INST",
        idn: None,
    };

    pub const MCUSH: InstrumentProfile = InstrumentProfile {
        name: "Mcush",
        idn: Some(IDN_MCUSH),
    };
}

/// One request/response conversation with a shell instrument.
///
/// Exactly one command is in flight at a time; `&mut self` on every
/// operation enforces that for a single owner. Share across threads only
/// behind a mutex.
pub struct CommandChannel<T: Transport> {
    transport: T,
    framer: LineFramer,
    config: InstrumentConfig,
    profile: InstrumentProfile,
    idn_pattern: Option<Regex>,
    identity: Option<Identity>,
    last_echo: Option<String>,
    last_prompt: Option<String>,
}

impl CommandChannel<Box<dyn Transport>> {
    /// Open the transport named by `config.endpoint`.
    pub fn open(config: InstrumentConfig, profile: InstrumentProfile) -> Result<Self> {
        let transport = open_transport(&config.endpoint);
        CommandChannel::new(transport, config, profile)
    }
}

impl<T: Transport> CommandChannel<T> {
    /// Wrap `transport`, connecting right away when `config.connect` is set.
    pub fn new(transport: T, config: InstrumentConfig, profile: InstrumentProfile) -> Result<Self> {
        let prompt = compile_anchored(config.prompts.as_deref().unwrap_or(DEFAULT_PROMPTS))?;
        let idn_pattern = profile.idn.map(compile_anchored).transpose()?;
        let framer = LineFramer::new(prompt).with_line_limit(config.line_limit);
        let connect = config.connect;
        let mut channel = CommandChannel {
            transport,
            framer,
            config,
            profile,
            idn_pattern,
            identity: None,
            last_echo: None,
            last_prompt: None,
        };
        if connect {
            channel.connect(true)?;
        }
        Ok(channel)
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    pub fn profile(&self) -> InstrumentProfile {
        self.profile
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.transport.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Open the transport, clear the device's command line and check identity.
    ///
    /// A transport that opens but reports itself disconnected is not an
    /// error: the caller inspects the returned state.
    pub fn connect(&mut self, check_idn: bool) -> Result<ConnectionState> {
        self.transport.connect()?;
        if !self.transport.is_connected() {
            return Ok(ConnectionState::Disconnected);
        }
        if self.config.terminal_reset {
            match self.reset_terminal() {
                Ok(()) => {}
                Err(e) if e.is_timeout() => warn!("{}: terminal reset: {}", self.profile.name, e),
                Err(e) => return Err(e),
            }
        }
        if check_idn && self.config.check_idn && self.idn_pattern.is_some() {
            self.scpi_idn(true)?;
        }
        info!("{}: connected to {}", self.profile.name, self.transport.endpoint());
        Ok(ConnectionState::Connected)
    }

    pub fn disconnect(&mut self) {
        if self.transport.is_connected() {
            self.transport.disconnect();
        }
    }

    /// Send Ctrl-C and drain to the next prompt
    fn reset_terminal(&mut self) -> Result<()> {
        self.transport.write(&[TERMINATOR_RESET])?;
        self.transport.flush()?;
        self.framer.read_until_prompt(&mut self.transport)?;
        Ok(())
    }

    fn assert_open(&mut self) -> Result<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        self.transport.connect()?;
        if !self.transport.is_connected() {
            return Err(McushError::Connection {
                endpoint: self.transport.endpoint().to_string(),
                reason: "fail to open port".to_string(),
            });
        }
        Ok(())
    }

    /// Write a line, terminated
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.assert_open()?;
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(TERMINATOR_WRITE);
        self.transport.write(&buf)?;
        self.transport.flush()
    }

    /// Read one line, waiting at most `timeout` when given.
    pub fn read_line(&mut self, timeout: Option<Duration>) -> Result<String> {
        let deadline = timeout.map(|t| Instant::now() + t);
        framer::read_line(&mut self.transport, TERMINATOR_READ, deadline)
    }

    /// Send `cmd` and return the lines between its echo and the prompt.
    pub fn write_command(&mut self, cmd: &str) -> Result<Vec<String>> {
        self.write_command_with(cmd, |_| {})
    }

    /// [`write_command`](Self::write_command), with `on_line` seeing every
    /// received line as it completes.
    pub fn write_command_with<F>(&mut self, cmd: &str, on_line: F) -> Result<Vec<String>>
    where
        F: FnMut(&str),
    {
        let cmd = cmd.trim();
        self.write_line(cmd)?;
        debug!("[T] {}", cmd);

        let mut lines = self
            .framer
            .read_until_prompt_with(&mut self.transport, on_line)
            .map_err(|e| e.with_command(cmd))?;
        if !cmd.is_empty() {
            // terminator left behind by a prompt recognised before its newline
            let stale = lines
                .iter()
                .take(lines.len() - 1)
                .take_while(|line| line.is_empty())
                .count();
            lines.drain(..stale);
        }
        for line in &lines {
            debug!("[R] {}", line);
        }

        let prompt = lines.last().cloned().unwrap_or_default();
        let echo = if lines.len() > 1 {
            lines[0].clone()
        } else {
            String::new()
        };
        let payload: Vec<String> = if lines.len() > 2 {
            lines[1..lines.len() - 1].to_vec()
        } else {
            Vec::new()
        };
        self.last_echo = Some(echo.clone());
        self.last_prompt = Some(prompt.clone());

        let command = if echo.is_empty() { cmd.to_string() } else { echo.clone() };
        match PromptClass::classify(&prompt) {
            PromptClass::Syntax => {
                return Err(McushError::CommandSyntax {
                    command,
                    detail: payload,
                })
            }
            PromptClass::Execute => {
                return Err(McushError::CommandExecute {
                    command,
                    detail: payload,
                })
            }
            PromptClass::Ok => {}
        }

        if self.config.check_echo && !cmd.is_empty() && echo != cmd {
            return Err(McushError::Response {
                sent: cmd.to_string(),
                returned: echo,
            });
        }
        Ok(payload)
    }

    /// Try `cmd` up to `retries - 1` times quietly, then once more letting
    /// the error through. `None` uses the configured count.
    pub fn write_command_retry(&mut self, cmd: &str, retries: Option<u32>) -> Result<Vec<String>> {
        let retries = retries.unwrap_or(self.config.command_retry);
        if retries < 2 {
            return Err(McushError::Config(format!(
                "retry count must be greater than 1, got {}",
                retries
            )));
        }
        for attempt in 1..retries {
            match self.write_command(cmd) {
                Ok(payload) => return Ok(payload),
                Err(e) => warn!(
                    "{}: attempt {}/{} of {:?}: {}",
                    self.profile.name, attempt, retries, cmd, e
                ),
            }
        }
        self.write_command(cmd)
    }

    /// Swap the prompt pattern; `None` restores the default. Returns the old one.
    pub fn set_prompts(&mut self, pattern: Option<&str>) -> Result<Regex> {
        let prompt = compile_anchored(pattern.unwrap_or(DEFAULT_PROMPTS))?;
        Ok(self.framer.set_prompt(prompt))
    }

    /// Change the per-byte timeout; `None` restores the default. Returns the old one.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<Duration> {
        let old = self.transport.timeout();
        self.transport.set_timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))?;
        Ok(old)
    }

    /// Echo line of the most recent command
    pub fn last_echo(&self) -> Option<&str> {
        self.last_echo.as_deref()
    }

    /// Prompt line of the most recent command
    pub fn last_prompt(&self) -> Option<&str> {
        self.last_prompt.as_deref()
    }

    pub fn scpi_rst(&mut self) -> Result<()> {
        self.write_command(CMD_RST)?;
        Ok(())
    }

    /// Query `*idn?`, optionally checking it against the family pattern.
    pub fn scpi_idn(&mut self, check: bool) -> Result<Identity> {
        let ret = self.write_command(CMD_IDN)?;
        let idn = ret
            .first()
            .map(|line| line.trim().to_string())
            .ok_or_else(|| McushError::EmptyResponse {
                command: CMD_IDN.to_string(),
            })?;
        let identity = Identity {
            idn,
            serial_number: ret.get(1).map(|line| line.trim().to_string()),
        };
        info!("{}: IDN:{}", self.profile.name, identity.idn);
        self.identity = Some(identity.clone());

        if check && self.config.check_idn {
            if let Some(pattern) = &self.idn_pattern {
                if !pattern.is_match(&identity.idn) {
                    return Err(McushError::IdentityMismatch {
                        model: identity.model().to_string(),
                        idn: identity.idn.clone(),
                    });
                }
            }
        }
        Ok(identity)
    }

    /// Cached identity, queried on first use
    pub fn identity(&mut self) -> Result<&Identity> {
        if self.identity.is_none() {
            self.scpi_idn(false)?;
        }
        self.identity.as_ref().ok_or_else(|| McushError::EmptyResponse {
            command: CMD_IDN.to_string(),
        })
    }

    pub fn model(&mut self) -> Result<String> {
        Ok(self.identity()?.model().to_string())
    }

    pub fn version(&mut self) -> Result<String> {
        Ok(self.identity()?.version().to_string())
    }

    /// Serial number line of `*idn?`, empty when the device has none
    pub fn serial_number(&mut self) -> Result<String> {
        let serial = self.identity()?.serial_number.clone().unwrap_or_default();
        info!("{}: SN:{}", self.profile.name, serial);
        Ok(serial)
    }

    /// Serial number read as hex bytes, most significant first when `msb`
    pub fn integer_serial_number(&mut self, msb: bool) -> Result<u128> {
        let serial = self.serial_number()?;
        if !serial.is_ascii() || serial.len() % 2 != 0 || serial.len() > 32 {
            return Err(McushError::Parse(format!("bad serial number {:?}", serial)));
        }
        let mut bytes = (0..serial.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&serial[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|e| McushError::Parse(format!("serial number {:?}: {}", serial, e)))?;
        if !msb {
            bytes.reverse();
        }
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    /// Reboot counter; not supported on every platform
    pub fn reboot_counter(&mut self) -> Result<u32> {
        let ret = self.write_command("reboot -c")?;
        let first = ret.first().ok_or_else(|| McushError::EmptyResponse {
            command: "reboot -c".to_string(),
        })?;
        first
            .trim()
            .parse()
            .map_err(|_| McushError::Parse(format!("reboot counter {:?}", first)))
    }

    pub fn reset_reboot_counter(&mut self) -> Result<()> {
        self.write_command("reboot -r")?;
        Ok(())
    }

    /// Whether the shell knows command `name`
    pub fn check_command(&mut self, name: &str) -> Result<bool> {
        let cmd = format!("? -c {}", name);
        let ret = self.write_command(&cmd)?;
        let first = ret
            .first()
            .ok_or_else(|| McushError::EmptyResponse { command: cmd.clone() })?;
        first
            .trim()
            .parse::<i64>()
            .map(|v| v != 0)
            .map_err(|_| McushError::Parse(format!("{:?} answered {:?}", cmd, first)))
    }

    /// Reopen the link and wait for a prompt; any failure counts.
    fn resync(&mut self) -> Result<()> {
        self.transport.disconnect();
        self.transport.connect()?;
        if !self.transport.is_connected() {
            return Err(McushError::Connection {
                endpoint: self.transport.endpoint().to_string(),
                reason: "not connected".to_string(),
            });
        }
        if self.config.terminal_reset {
            self.reset_terminal()?;
        }
        Ok(())
    }

    /// Reboot the device and wait for it to come back.
    ///
    /// The link may drop mid-response, so echo and timeout failures of
    /// the `reboot` command itself are expected. Reconnection is retried
    /// at most `reboot_retry` times before failing with a timeout.
    pub fn reboot(&mut self, delay: Option<Duration>) -> Result<()> {
        match self.write_command(CMD_REBOOT) {
            Ok(_) => {}
            Err(e @ (McushError::Response { .. } | McushError::CommandTimeout { .. })) => {
                debug!("{}: reboot: {}", self.profile.name, e)
            }
            Err(e) => return Err(e),
        }

        let mut retry = 0;
        while let Err(e) = self.resync() {
            retry += 1;
            warn!("{}: reconnect {} after reboot: {}", self.profile.name, retry, e);
            if retry > self.config.reboot_retry {
                return Err(McushError::CommandTimeout {
                    command: Some(CMD_REBOOT.to_string()),
                    partial: Some(format!("device not back after {} reconnects", retry)),
                });
            }
            thread::sleep(self.config.reboot_retry_interval);
        }

        self.identity = None;
        let check = self.idn_pattern.is_some();
        self.scpi_idn(check)?;
        thread::sleep(delay.unwrap_or(self.config.reboot_delay));
        Ok(())
    }
}
