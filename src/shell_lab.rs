//! Shell Lab instrument families.
//!
//! Each family is a thin layer of command builders over one
//! [`CommandChannel`]; nothing here touches the transport directly.

use crate::channel::{CommandChannel, InstrumentProfile};
use crate::config::InstrumentConfig;
use crate::constants::*;
use crate::error::{McushError, Result};
use crate::transport::{open_transport, Transport};
use log::debug;
use std::fmt::Write as _;

pub const SHELL_LAB: InstrumentProfile = InstrumentProfile {
    name: "ShellLab",
    idn: Some(IDN_SHELL_LAB),
};

pub const SHELL_LAB_LAMP: InstrumentProfile = InstrumentProfile {
    name: "ShellLabLamp",
    idn: Some(IDN_SHELL_LAB_LAMP),
};

pub const SHELL_LAB_STRAP: InstrumentProfile = InstrumentProfile {
    name: "ShellLabStrap",
    idn: Some(IDN_SHELL_LAB_STRAP),
};

/// CAN gateway variant; same command set as [`ShellLab`]
pub const SHELL_LAB_CAN: InstrumentProfile = InstrumentProfile {
    name: "ShellLabCAN",
    idn: Some(IDN_SHELL_LAB_CAN),
};

/// Named colours understood by [`color_by_name`]
pub const COLOR_TABLE: &[(&str, u32)] = &[
    ("black", 0x000000),
    ("red", 0xFF0000),
    ("green", 0x00FF00),
    ("blue", 0x0000FF),
    ("yellow", 0xFFFF00),
    ("cyan", 0x00FFFF),
    ("purple", 0xFF00FF),
    ("white", 0xFFFFFF),
];

pub fn color_by_name(name: &str) -> Result<u32> {
    COLOR_TABLE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, c)| c)
        .ok_or_else(|| McushError::Parse(format!("Unknown color name {}", name)))
}

/// Scale each RGB component of `color` by `brightness` (0.0..=1.0).
pub fn dim_color(color: u32, brightness: f64) -> u32 {
    let scale = |shift: u32| {
        let c = ((color >> shift) & 0xFF) as f64 * brightness.clamp(0.0, 1.0);
        (c as u32 & 0xFF) << shift
    };
    scale(16) | scale(8) | scale(0)
}

/// Bit mask with one bit per selected channel (0..8)
pub fn channel_mask(channels: &[u8]) -> u8 {
    channels
        .iter()
        .filter(|&&c| c < 8)
        .fold(0, |mask, &c| mask | (1 << c))
}

/// Options shared by the `lamp` and `strap` commands
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedSettings {
    pub color: Option<u32>,
    pub red: Option<u8>,
    pub green: Option<u8>,
    pub blue: Option<u8>,
    /// Blink frequency in Hz; 0 means steady
    pub freq: Option<f64>,
    pub count: Option<u32>,
}

impl LedSettings {
    pub fn color(color: u32) -> Self {
        LedSettings {
            color: Some(color),
            ..Default::default()
        }
    }

    pub fn with_freq(mut self, freq: Option<f64>) -> Self {
        self.freq = freq;
        self
    }

    pub fn with_count(mut self, count: Option<u32>) -> Self {
        self.count = count;
        self
    }

    /// `base` followed by one flag per set option
    pub fn command(&self, base: &str) -> String {
        let mut cmd = base.to_string();
        if let Some(c) = self.color {
            let _ = write!(cmd, " -c 0x{:X}", c);
        }
        if let Some(r) = self.red {
            let _ = write!(cmd, " -r {}", r);
        }
        if let Some(g) = self.green {
            let _ = write!(cmd, " -g {}", g);
        }
        if let Some(b) = self.blue {
            let _ = write!(cmd, " -b {}", b);
        }
        if let Some(f) = self.freq {
            let _ = write!(cmd, " -f {}", f);
        }
        if let Some(n) = self.count {
            let _ = write!(cmd, " -C {}", n);
        }
        cmd
    }
}

fn parse_number<N: std::str::FromStr>(cmd: &str, lines: &[String]) -> Result<N> {
    let first = lines.first().ok_or_else(|| McushError::EmptyResponse {
        command: cmd.to_string(),
    })?;
    first
        .trim()
        .parse()
        .map_err(|_| McushError::Parse(format!("{:?} answered {:?}", cmd, first)))
}

/// Data acquisition and measurement board
pub struct ShellLab<T: Transport> {
    channel: CommandChannel<T>,
    vref: Option<f64>,
    channels: Vec<u8>,
}

impl ShellLab<Box<dyn Transport>> {
    pub fn open(config: InstrumentConfig) -> Result<Self> {
        ShellLab::with_profile(open_transport(&config.endpoint), config, SHELL_LAB)
    }

    /// Open the CAN gateway variant
    pub fn open_can(config: InstrumentConfig) -> Result<Self> {
        ShellLab::with_profile(open_transport(&config.endpoint), config, SHELL_LAB_CAN)
    }
}

impl<T: Transport> ShellLab<T> {
    pub fn new(transport: T, config: InstrumentConfig) -> Result<Self> {
        Self::with_profile(transport, config, SHELL_LAB)
    }

    pub fn with_profile(
        transport: T,
        config: InstrumentConfig,
        profile: InstrumentProfile,
    ) -> Result<Self> {
        Ok(ShellLab {
            channel: CommandChannel::new(transport, config, profile)?,
            vref: None,
            channels: Vec::new(),
        })
    }

    pub fn channel(&self) -> &CommandChannel<T> {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel<T> {
        &mut self.channel
    }

    pub fn into_inner(self) -> CommandChannel<T> {
        self.channel
    }

    /// `*rst` when the firmware has it
    pub fn scpi_rst(&mut self) -> Result<()> {
        if self.channel.check_command(CMD_RST)? {
            self.channel.scpi_rst()
        } else {
            debug!("{}: no {} command", self.channel.profile().name, CMD_RST);
            Ok(())
        }
    }

    pub fn daq(
        &mut self,
        cmd: &str,
        index: Option<u32>,
        value: Option<i64>,
    ) -> Result<Vec<String>> {
        let mut line = format!("daq -c {}", cmd);
        if let Some(i) = index {
            let _ = write!(line, " -i {}", i);
        }
        if let Some(v) = value {
            let _ = write!(line, " -v {}", v);
        }
        self.channel.write_command(&line)
    }

    /// Configure and arm the converter. `channels` is ignored when a mask
    /// is given.
    pub fn daq_init(
        &mut self,
        freq: Option<u32>,
        length: Option<u32>,
        channels: &[u8],
        mask: Option<u8>,
    ) -> Result<()> {
        if let Some(freq) = freq {
            self.daq("freq", None, Some(freq as i64))?;
        }
        if let Some(length) = length {
            self.daq("length", None, Some(length as i64))?;
        }
        let mask = mask.unwrap_or_else(|| channel_mask(channels));
        self.daq("channel_mask", None, Some(mask as i64))?;
        self.channels = (0..8).filter(|c| mask & (1 << c) != 0).collect();
        self.daq("init", None, None)?;
        self.daq_vref()?;
        Ok(())
    }

    /// Reference voltage, re-read from the device
    pub fn daq_vref(&mut self) -> Result<f64> {
        let ret = self.daq("vref", None, None)?;
        let vref = parse_number("daq -c vref", &ret)?;
        self.vref = Some(vref);
        Ok(vref)
    }

    /// Channels enabled by the last [`daq_init`](Self::daq_init)
    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    pub fn daq_deinit(&mut self) -> Result<()> {
        self.daq("deinit", None, None).map(|_| ())
    }

    pub fn daq_start(&mut self) -> Result<()> {
        self.daq("start", None, None).map(|_| ())
    }

    pub fn daq_stop(&mut self) -> Result<()> {
        self.daq("stop", None, None).map(|_| ())
    }

    pub fn daq_reset(&mut self) -> Result<()> {
        self.daq("reset", None, None).map(|_| ())
    }

    pub fn daq_done(&mut self) -> Result<bool> {
        let ret = self.daq("done", None, None)?;
        Ok(parse_number::<i64>("daq -c done", &ret)? != 0)
    }

    /// Samples of `channel` in volts. Raw values are 12-bit hex.
    pub fn daq_read(&mut self, channel: u32) -> Result<Vec<f64>> {
        let vref = match self.vref {
            Some(v) => v,
            None => self.daq_vref()?,
        };
        let ret = self.daq("read", Some(channel), None)?;
        let mut samples = Vec::new();
        for line in &ret {
            for v in line.trim().split(',').filter(|v| !v.is_empty()) {
                let raw = u32::from_str_radix(v.trim(), 16)
                    .map_err(|_| McushError::Parse(format!("daq sample {:?}", v)))?;
                samples.push(raw as f64 * vref / 4096.0);
            }
        }
        Ok(samples)
    }

    pub fn measure(
        &mut self,
        cmd: &str,
        index: Option<u32>,
        value: Option<i64>,
        fvalue: Option<f64>,
    ) -> Result<Vec<String>> {
        let mut line = format!("measure -c {}", cmd);
        if let Some(i) = index {
            let _ = write!(line, " -i {}", i);
        }
        if let Some(v) = value {
            let _ = write!(line, " -v {}", v);
        }
        if let Some(f) = fvalue {
            let _ = write!(line, " -V {:.6}", f);
        }
        self.channel.write_command(&line)
    }

    pub fn measure_start(&mut self) -> Result<()> {
        self.measure("start", None, None, None).map(|_| ())
    }

    pub fn measure_stop(&mut self) -> Result<()> {
        self.measure("stop", None, None, None).map(|_| ())
    }

    pub fn measure_read(&mut self, channel: u32) -> Result<Vec<f64>> {
        let ret = self.measure("read", Some(channel), None, None)?;
        let mut values = Vec::new();
        for line in &ret {
            for v in line.trim().split(',').filter(|v| !v.is_empty()) {
                values.push(
                    v.trim()
                        .parse()
                        .map_err(|_| McushError::Parse(format!("measure value {:?}", v)))?,
                );
            }
        }
        Ok(values)
    }
}

/// Signal lamp with buzzer
pub struct ShellLabLamp<T: Transport> {
    channel: CommandChannel<T>,
}

impl<T: Transport> ShellLabLamp<T> {
    pub fn new(transport: T, config: InstrumentConfig) -> Result<Self> {
        Ok(ShellLabLamp {
            channel: CommandChannel::new(transport, config, SHELL_LAB_LAMP)?,
        })
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel<T> {
        &mut self.channel
    }

    pub fn lamp(&mut self, settings: &LedSettings) -> Result<Vec<String>> {
        self.channel.write_command(&settings.command("lamp"))
    }

    pub fn alarm(&mut self, count: Option<u32>, freq: Option<u32>) -> Result<Vec<String>> {
        let mut cmd = "alarm".to_string();
        if let Some(c) = count {
            let _ = write!(cmd, " -c {}", c);
        }
        if let Some(f) = freq {
            let _ = write!(cmd, " -f {}", f);
        }
        self.channel.write_command(&cmd)
    }

    /// Lamp off, buzzer silent
    pub fn reset(&mut self, lamp_freq: f64, alarm_freq: u32) -> Result<()> {
        self.lamp(&LedSettings::color(0).with_freq(Some(lamp_freq)))?;
        self.alarm(Some(0), Some(alarm_freq))?;
        Ok(())
    }

    pub fn color(&mut self, color: u32, freq: Option<f64>, count: Option<u32>) -> Result<()> {
        self.lamp(&LedSettings::color(color).with_freq(freq).with_count(count))
            .map(|_| ())
    }

    pub fn color_named(&mut self, name: &str, freq: Option<f64>, count: Option<u32>) -> Result<()> {
        let color = color_by_name(name)?;
        self.color(color, freq, count)
    }
}

/// Addressable LED strap
pub struct ShellLabStrap<T: Transport> {
    channel: CommandChannel<T>,
}

impl<T: Transport> ShellLabStrap<T> {
    /// Connect and, when `length` is given, set the number of LEDs.
    pub fn new(transport: T, config: InstrumentConfig, length: Option<u32>) -> Result<Self> {
        let mut strap = ShellLabStrap {
            channel: CommandChannel::new(transport, config, SHELL_LAB_STRAP)?,
        };
        if let Some(length) = length {
            strap.strap_length(length)?;
        }
        Ok(strap)
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel<T> {
        &mut self.channel
    }

    pub fn strap_length(&mut self, length: u32) -> Result<()> {
        self.channel.write_command(&format!("strap -l{}", length))?;
        Ok(())
    }

    pub fn strap(&mut self, settings: &LedSettings) -> Result<Vec<String>> {
        self.channel.write_command(&settings.command("strap"))
    }

    pub fn reset(&mut self, freq: f64) -> Result<()> {
        self.strap(&LedSettings::color(0).with_freq(Some(freq)))
            .map(|_| ())
    }

    pub fn color(&mut self, color: u32, freq: Option<f64>, count: Option<u32>) -> Result<()> {
        self.strap(&LedSettings::color(color).with_freq(freq).with_count(count))
            .map(|_| ())
    }

    pub fn color_named(&mut self, name: &str, freq: Option<f64>, count: Option<u32>) -> Result<()> {
        let color = color_by_name(name)?;
        self.color(color, freq, count)
    }

    /// Steady colour scaled by `brightness`
    pub fn color_dimmed(&mut self, color: u32, brightness: f64) -> Result<()> {
        self.strap(&LedSettings::color(dim_color(color, brightness)))
            .map(|_| ())
    }
}
