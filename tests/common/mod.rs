//! Simulated peers shared by the integration tests.
#![allow(dead_code)]

use mcush_protocol::constants::*;
use mcush_protocol::{CanBus, CanFrame, InstrumentConfig, McushError, Result, Transport};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// How the simulated shell answers one command
pub enum Reply {
    Lines(Vec<String>),
    Syntax(Vec<String>),
    Execute(Vec<String>),
    /// Wrong echo line, then the payload and an ok prompt
    Echo(String, Vec<String>),
    /// Nothing at all
    Silent,
    /// Go silent, then refuse this many reconnects
    Reboot(u32),
}

pub fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

type Handler = Box<dyn FnMut(&str) -> Reply>;

/// MCUSH shell behind a `Transport`: echo, payload, prompt.
///
/// Reads never block; an empty read stands in for a transport timeout.
pub struct SimShell {
    handler: Handler,
    outbox: VecDeque<u8>,
    line: Vec<u8>,
    connected: bool,
    refuse_connects: u32,
    timeout: Duration,
    /// Swallow the 0x03 line reset without printing a prompt
    pub ignore_reset: bool,
    pub commands: Vec<String>,
    pub connects: u32,
    pub resets: u32,
}

impl SimShell {
    pub fn new(handler: impl FnMut(&str) -> Reply + 'static) -> Self {
        SimShell {
            handler: Box::new(handler),
            outbox: VecDeque::new(),
            line: Vec::new(),
            connected: false,
            refuse_connects: 0,
            timeout: Duration::from_millis(10),
            ignore_reset: false,
            commands: Vec::new(),
            connects: 0,
            resets: 0,
        }
    }

    /// Answers `*idn?` like a stock MCUSH board; everything else with
    /// `handler`.
    pub fn mcush(mut handler: impl FnMut(&str) -> Reply + 'static) -> Self {
        SimShell::new(move |cmd| match cmd {
            "*idn?" => Reply::Lines(lines(&["mcush,2.0.1", "0011AABB"])),
            _ => handler(cmd),
        })
    }

    pub fn with_idn(idn: &'static str) -> Self {
        SimShell::new(move |cmd| match cmd {
            "*idn?" => Reply::Lines(lines(&[idn])),
            _ => Reply::Lines(Vec::new()),
        })
    }

    /// Fail the next `n` connects
    pub fn refuse_connects(&mut self, n: u32) {
        self.refuse_connects = n;
    }

    /// Commands received, terminal resets excluded
    pub fn count(&self, cmd: &str) -> usize {
        self.commands.iter().filter(|c| c.as_str() == cmd).count()
    }

    fn emit(&mut self, echo: &str, payload: &[String], prompt: &str) {
        let mut text = format!("{}\r\n", echo);
        for line in payload {
            text.push_str(line);
            text.push_str("\r\n");
        }
        text.push_str(prompt);
        self.outbox.extend(text.bytes());
    }

    fn respond(&mut self, cmd: String) {
        self.commands.push(cmd.clone());
        match (self.handler)(&cmd) {
            Reply::Lines(payload) => self.emit(&cmd, &payload, "=>"),
            Reply::Syntax(payload) => self.emit(&cmd, &payload, "?>"),
            Reply::Execute(payload) => self.emit(&cmd, &payload, "!>"),
            Reply::Echo(echo, payload) => self.emit(&echo, &payload, "=>"),
            Reply::Silent => {}
            Reply::Reboot(refuse) => self.refuse_connects = refuse,
        }
    }
}

impl Transport for SimShell {
    fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        if self.refuse_connects > 0 {
            self.refuse_connects -= 1;
            return Err(McushError::Connection {
                endpoint: "sim".to_string(),
                reason: "device rebooting".to_string(),
            });
        }
        self.connected = true;
        self.connects += 1;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.outbox.clear();
        self.line.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(McushError::Connection {
                endpoint: "sim".to_string(),
                reason: "port is not open".to_string(),
            });
        }
        let n = n.min(self.outbox.len());
        Ok(self.outbox.drain(..n).collect())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(McushError::Connection {
                endpoint: "sim".to_string(),
                reason: "port is not open".to_string(),
            });
        }
        for &byte in buf {
            match byte {
                TERMINATOR_RESET => {
                    self.line.clear();
                    self.resets += 1;
                    if !self.ignore_reset {
                        self.outbox.extend(b"\r\n=>");
                    }
                }
                TERMINATOR_WRITE => {
                    let raw = std::mem::take(&mut self.line);
                    let cmd = String::from_utf8_lossy(&raw).trim_end().to_string();
                    self.respond(cmd);
                }
                _ => self.line.push(byte),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "sim"
    }
}

/// Test config: no environment, fast reboot pacing
pub fn config() -> InstrumentConfig {
    InstrumentConfig::builder()
        .port("sim")
        .reboot_retry(3)
        .reboot_retry_interval(Duration::from_millis(1))
        .reboot_delay(Duration::ZERO)
        .build_with_env(|_| None)
        .unwrap()
}

enum Transfer {
    Upload {
        key: (u16, u8),
        data: Vec<u8>,
        pos: usize,
        toggle: u8,
    },
    Download {
        key: (u16, u8),
        data: Vec<u8>,
        toggle: u8,
    },
}

/// CANopen SDO server with an in-memory object dictionary
pub struct SimNode {
    node: u8,
    pub objects: HashMap<(u16, u8), Vec<u8>>,
    inbox: Vec<CanFrame>,
    transfer: Option<Transfer>,
    /// Frames the client sent
    pub sent: Vec<CanFrame>,
    /// Answer every segment with toggle 0
    pub stuck_toggle: bool,
    /// Abort the first segment with this code
    pub abort_segment: Option<u32>,
    /// Send every response twice
    pub duplicate: bool,
    /// Surround responses with traffic for other nodes and objects
    pub noise: bool,
    /// Answer segmented uploads without a size
    pub hide_size: bool,
}

impl SimNode {
    pub fn new(node: u8) -> Self {
        SimNode {
            node,
            objects: HashMap::new(),
            inbox: Vec::new(),
            transfer: None,
            sent: Vec::new(),
            stuck_toggle: false,
            abort_segment: None,
            duplicate: false,
            noise: false,
            hide_size: false,
        }
    }

    pub fn with_object(mut self, index: u16, subindex: u8, data: &[u8]) -> Self {
        self.objects.insert((index, subindex), data.to_vec());
        self
    }

    fn reply(&mut self, data: [u8; 8]) {
        let id = 0x580 + self.node as u32;
        if self.noise {
            let mut other = data;
            other[1] ^= 0xFF;
            self.inbox.push(CanFrame::new(id + 1, &data).unwrap());
            self.inbox.push(CanFrame::new(0x080, &[]).unwrap());
            self.inbox.push(CanFrame::new_remote(id).unwrap());
            if data[0] & 0xE0 == 0x40 || data[0] & 0xE0 == 0x60 {
                self.inbox.push(CanFrame::new(id, &other).unwrap());
            }
        }
        let frame = CanFrame::new(id, &data).unwrap();
        self.inbox.push(frame);
        if self.duplicate {
            self.inbox.push(frame);
        }
    }

    fn abort(&mut self, request: &[u8], code: u32) {
        self.transfer = None;
        let mut data = [0u8; 8];
        data[0] = 0x80;
        data[1..4].copy_from_slice(&request[1..4]);
        data[4..].copy_from_slice(&code.to_le_bytes());
        self.reply(data);
    }

    fn segment_toggle(&self, toggle: u8) -> u8 {
        if self.stuck_toggle {
            0
        } else {
            toggle
        }
    }

    fn handle(&mut self, req: [u8; 8]) {
        let key = (u16::from_le_bytes([req[1], req[2]]), req[3]);
        match req[0] & 0xE0 {
            // initiate upload
            0x40 => {
                let Some(data) = self.objects.get(&key).cloned() else {
                    return self.abort(&req, 0x0602_0000);
                };
                let mut resp = [0u8; 8];
                resp[1..4].copy_from_slice(&req[1..4]);
                if data.len() <= 4 {
                    resp[0] = 0x43 | (((4 - data.len()) as u8) << 2);
                    resp[4..4 + data.len()].copy_from_slice(&data);
                } else if self.hide_size {
                    resp[0] = 0x40;
                } else {
                    resp[0] = 0x41;
                    resp[4..].copy_from_slice(&(data.len() as u32).to_le_bytes());
                }
                if data.len() > 4 {
                    self.transfer = Some(Transfer::Upload {
                        key,
                        data,
                        pos: 0,
                        toggle: 0,
                    });
                }
                self.reply(resp);
            }
            // upload segment
            0x60 => {
                if let Some(code) = self.abort_segment.take() {
                    return self.abort(&req, code);
                }
                let Some(Transfer::Upload { data, pos, toggle, key }) = self.transfer.take() else {
                    return self.abort(&req, 0x0504_0001);
                };
                if req[0] & 0x10 != toggle {
                    return self.abort(&req, 0x0503_0000);
                }
                let end = data.len().min(pos + 7);
                let chunk = &data[pos..end];
                let last = end == data.len();
                let mut resp = [0u8; 8];
                resp[0] = self.segment_toggle(toggle)
                    | (((7 - chunk.len()) as u8) << 1)
                    | last as u8;
                resp[1..1 + chunk.len()].copy_from_slice(chunk);
                if !last {
                    self.transfer = Some(Transfer::Upload {
                        key,
                        data,
                        pos: end,
                        toggle: toggle ^ 0x10,
                    });
                }
                self.reply(resp);
            }
            // initiate download
            0x20 => {
                let mut resp = [0u8; 8];
                resp[0] = 0x60;
                resp[1..4].copy_from_slice(&req[1..4]);
                if req[0] & 0x02 != 0 {
                    let n = if req[0] & 0x01 != 0 {
                        4 - ((req[0] >> 2) & 0x03) as usize
                    } else {
                        4
                    };
                    self.objects.insert(key, req[4..4 + n].to_vec());
                } else {
                    self.transfer = Some(Transfer::Download {
                        key,
                        data: Vec::new(),
                        toggle: 0,
                    });
                }
                self.reply(resp);
            }
            // download segment
            0x00 => {
                if let Some(code) = self.abort_segment.take() {
                    return self.abort(&req, code);
                }
                let Some(Transfer::Download { key, mut data, toggle }) = self.transfer.take() else {
                    return self.abort(&req, 0x0504_0001);
                };
                if req[0] & 0x10 != toggle {
                    return self.abort(&req, 0x0503_0000);
                }
                let used = 7 - ((req[0] >> 1) & 0x07) as usize;
                data.extend_from_slice(&req[1..1 + used]);
                let mut resp = [0u8; 8];
                resp[0] = 0x20 | self.segment_toggle(toggle);
                if req[0] & 0x01 != 0 {
                    self.objects.insert(key, data);
                } else {
                    self.transfer = Some(Transfer::Download {
                        key,
                        data,
                        toggle: toggle ^ 0x10,
                    });
                }
                self.reply(resp);
            }
            // abort from the client
            0x80 => self.transfer = None,
            _ => self.abort(&req, 0x0504_0001),
        }
    }
}

impl CanBus for SimNode {
    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        self.sent.push(*frame);
        if frame.id() == 0x600 + self.node as u32 && frame.data().len() == 8 {
            let mut req = [0u8; 8];
            req.copy_from_slice(frame.data());
            self.handle(req);
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<CanFrame>> {
        Ok(std::mem::take(&mut self.inbox))
    }
}
