//! Instrument configuration.
//!
//! A value given explicitly (builder call or TOML file) wins. Settings
//! with an `ENV_*` key below fall back to that `MCUSH_*` environment
//! variable next. Everything ends at the built-in default; `connect`,
//! `terminal_reset` and `prompts` have no environment layer.

use crate::constants::*;
use crate::error::{McushError, Result};
use crate::types::Parity;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PORT: &str = "MCUSH_PORT";
pub const ENV_BAUDRATE: &str = "MCUSH_BAUDRATE";
pub const ENV_PARITY: &str = "MCUSH_PARITY";
pub const ENV_RTSCTS: &str = "MCUSH_RTSCTS";
pub const ENV_TIMEOUT: &str = "MCUSH_TIMEOUT";
pub const ENV_NO_ECHO_CHECK: &str = "MCUSH_NO_ECHO_CHECK";
pub const ENV_NO_IDN_CHECK: &str = "MCUSH_NO_IDN_CHECK";
pub const ENV_COMMAND_RETRY: &str = "MCUSH_COMMAND_RETRY";
pub const ENV_REBOOT_DELAY: &str = "MCUSH_REBOOT_DELAY";
pub const ENV_REBOOT_RETRY: &str = "MCUSH_REBOOT_RETRY";
pub const ENV_REBOOT_RETRY_INTERVAL: &str = "MCUSH_REBOOT_RETRY_INTERVAL";
pub const ENV_LINE_LIMIT: &str = "MCUSH_LINE_LIMIT";

#[cfg(windows)]
const DEFAULT_PORT: &str = "COM1";
#[cfg(not(windows))]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Where and how to open the byte stream
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// Serial port path, or `tcp://host:port`
    pub port: String,
    pub baudrate: u32,
    pub parity: Parity,
    /// Hardware (RTS/CTS) flow control
    pub rtscts: bool,
    /// Per-byte read timeout
    pub timeout: Duration,
}

impl EndpointConfig {
    /// `host:port` when the endpoint names a TCP socket
    pub fn socket_address(&self) -> Option<&str> {
        self.port.strip_prefix("tcp://")
    }
}

/// Everything a `CommandChannel` needs besides its transport
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentConfig {
    pub endpoint: EndpointConfig,
    /// Connect while constructing the instrument
    pub connect: bool,
    /// Verify `*idn?` against the family pattern on connect
    pub check_idn: bool,
    /// Send Ctrl-C and drain to the prompt on connect
    pub terminal_reset: bool,
    /// Compare the echoed line with the command sent
    pub check_echo: bool,
    /// Prompt pattern override
    pub prompts: Option<String>,
    /// Attempts made by `write_command_retry`
    pub command_retry: u32,
    /// Reconnect attempts allowed after `reboot`
    pub reboot_retry: u32,
    pub reboot_retry_interval: Duration,
    /// Settle time after `reboot`
    pub reboot_delay: Duration,
    /// Longest accepted response line
    pub line_limit: Option<usize>,
}

impl InstrumentConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        ConfigBuilder::default().build()
    }

    /// Read a TOML file as the explicit layer, then resolve as usual.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let builder: ConfigBuilder =
            toml::from_str(text).map_err(|e| McushError::Config(e.to_string()))?;
        builder.build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Explicit settings; anything left `None` falls through to env and default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigBuilder {
    port: Option<String>,
    baudrate: Option<u32>,
    parity: Option<Parity>,
    rtscts: Option<bool>,
    /// Seconds
    timeout: Option<f64>,
    connect: Option<bool>,
    check_idn: Option<bool>,
    terminal_reset: Option<bool>,
    check_echo: Option<bool>,
    prompts: Option<String>,
    command_retry: Option<u32>,
    reboot_retry: Option<u32>,
    /// Seconds
    reboot_retry_interval: Option<f64>,
    /// Seconds
    reboot_delay: Option<f64>,
    line_limit: Option<usize>,
}

impl ConfigBuilder {
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = Some(baudrate);
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = Some(parity);
        self
    }

    pub fn rtscts(mut self, rtscts: bool) -> Self {
        self.rtscts = Some(rtscts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_secs_f64());
        self
    }

    pub fn connect(mut self, connect: bool) -> Self {
        self.connect = Some(connect);
        self
    }

    pub fn check_idn(mut self, check_idn: bool) -> Self {
        self.check_idn = Some(check_idn);
        self
    }

    pub fn terminal_reset(mut self, terminal_reset: bool) -> Self {
        self.terminal_reset = Some(terminal_reset);
        self
    }

    pub fn check_echo(mut self, check_echo: bool) -> Self {
        self.check_echo = Some(check_echo);
        self
    }

    pub fn prompts(mut self, pattern: impl Into<String>) -> Self {
        self.prompts = Some(pattern.into());
        self
    }

    pub fn command_retry(mut self, retry: u32) -> Self {
        self.command_retry = Some(retry);
        self
    }

    pub fn reboot_retry(mut self, retry: u32) -> Self {
        self.reboot_retry = Some(retry);
        self
    }

    pub fn reboot_retry_interval(mut self, interval: Duration) -> Self {
        self.reboot_retry_interval = Some(interval.as_secs_f64());
        self
    }

    pub fn reboot_delay(mut self, delay: Duration) -> Self {
        self.reboot_delay = Some(delay.as_secs_f64());
        self
    }

    pub fn line_limit(mut self, limit: usize) -> Self {
        self.line_limit = Some(limit);
        self
    }

    /// Resolve against the process environment.
    pub fn build(self) -> Result<InstrumentConfig> {
        self.build_with_env(|key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary environment lookup.
    pub fn build_with_env<F>(self, env: F) -> Result<InstrumentConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match self.port {
            Some(port) => port,
            None => env(ENV_PORT).unwrap_or_else(|| DEFAULT_PORT.to_string()),
        };
        let baudrate = resolve(self.baudrate, &env, ENV_BAUDRATE, DEFAULT_BAUD_RATE)?;
        let parity = match self.parity {
            Some(parity) => parity,
            None => match env(ENV_PARITY) {
                Some(value) => value.parse::<Parity>()?,
                None => Parity::None,
            },
        };
        let rtscts = match self.rtscts {
            Some(rtscts) => rtscts,
            None => env(ENV_RTSCTS).map(|v| parse_flag(&v)).unwrap_or(false),
        };
        let timeout = resolve(self.timeout, &env, ENV_TIMEOUT, DEFAULT_TIMEOUT.as_secs_f64())?;
        let check_echo = match self.check_echo {
            Some(check) => check,
            None => !env(ENV_NO_ECHO_CHECK).map(|v| parse_flag(&v)).unwrap_or(false),
        };
        let check_idn = match self.check_idn {
            Some(check) => check,
            None => !env(ENV_NO_IDN_CHECK).map(|v| parse_flag(&v)).unwrap_or(false),
        };
        let command_retry = resolve(
            self.command_retry,
            &env,
            ENV_COMMAND_RETRY,
            DEFAULT_COMMAND_RETRY,
        )?;
        let reboot_delay = resolve(
            self.reboot_delay,
            &env,
            ENV_REBOOT_DELAY,
            DEFAULT_REBOOT_DELAY.as_secs_f64(),
        )?;
        let reboot_retry = resolve(
            self.reboot_retry,
            &env,
            ENV_REBOOT_RETRY,
            DEFAULT_REBOOT_RETRY,
        )?;
        let reboot_retry_interval = resolve(
            self.reboot_retry_interval,
            &env,
            ENV_REBOOT_RETRY_INTERVAL,
            DEFAULT_REBOOT_RETRY_INTERVAL.as_secs_f64(),
        )?;
        let line_limit = match self.line_limit {
            Some(limit) => Some(limit),
            // zero turns the limit off
            None => match resolve(None, &env, ENV_LINE_LIMIT, 0usize)? {
                0 => None,
                n => Some(n),
            },
        };

        if command_retry < 2 {
            return Err(McushError::Config(format!(
                "command_retry must be at least 2, got {}",
                command_retry
            )));
        }
        if baudrate == 0 {
            return Err(McushError::Config("baudrate must be non-zero".to_string()));
        }

        Ok(InstrumentConfig {
            endpoint: EndpointConfig {
                port,
                baudrate,
                parity,
                rtscts,
                timeout: seconds(timeout, "timeout")?,
            },
            connect: self.connect.unwrap_or(true),
            check_idn,
            terminal_reset: self.terminal_reset.unwrap_or(true),
            check_echo,
            prompts: self.prompts,
            command_retry,
            reboot_retry,
            reboot_retry_interval: seconds(reboot_retry_interval, "reboot_retry_interval")?,
            reboot_delay: seconds(reboot_delay, "reboot_delay")?,
            line_limit,
        })
    }
}

fn resolve<T, F>(explicit: Option<T>, env: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = explicit {
        return Ok(value);
    }
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| McushError::Config(format!("{}={:?} is not valid", key, raw))),
        None => Ok(default),
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn seconds(value: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        McushError::Config(format!(
            "{} must be a non-negative number of seconds",
            name
        ))
    })
}
