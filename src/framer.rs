//! Line framing for the shell protocol.
//!
//! The device never frames its output: a response is whatever arrives
//! until a line matches the prompt pattern. Failure is purely
//! timeout-driven, each `read(1)` being bounded by the transport timeout.

use crate::constants::TERMINATOR_READ;
use crate::error::{McushError, Result};
use crate::transport::Transport;
use regex::Regex;
use std::time::Instant;

/// Compile `pattern` so it must match at the start of a line.
pub fn compile_anchored(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})", pattern))?)
}

/// Accumulates bytes into lines until a prompt line shows up
#[derive(Debug, Clone)]
pub struct LineFramer {
    terminator: u8,
    prompt: Regex,
    line_limit: Option<usize>,
}

impl LineFramer {
    pub fn new(prompt: Regex) -> Self {
        LineFramer {
            terminator: TERMINATOR_READ,
            prompt,
            line_limit: None,
        }
    }

    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_line_limit(mut self, limit: Option<usize>) -> Self {
        self.line_limit = limit;
        self
    }

    pub fn prompt(&self) -> &Regex {
        &self.prompt
    }

    /// Replace the prompt pattern, returning the old one.
    pub fn set_prompt(&mut self, prompt: Regex) -> Regex {
        std::mem::replace(&mut self.prompt, prompt)
    }

    pub fn is_prompt(&self, line: &str) -> bool {
        self.prompt.is_match(line)
    }

    /// Read until a prompt line; the prompt is the last element.
    pub fn read_until_prompt<T>(&self, transport: &mut T) -> Result<Vec<String>>
    where
        T: Transport + ?Sized,
    {
        self.read_until_prompt_with(transport, |_| {})
    }

    /// Same as [`read_until_prompt`](Self::read_until_prompt), calling
    /// `on_line` for every completed line as it arrives.
    pub fn read_until_prompt_with<T, F>(
        &self,
        transport: &mut T,
        mut on_line: F,
    ) -> Result<Vec<String>>
    where
        T: Transport + ?Sized,
        F: FnMut(&str),
    {
        let mut lines: Vec<String> = Vec::new();
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let byte = match transport.read(1)?.first() {
                Some(&byte) => byte,
                None => return Err(timeout(&lines, &pending)),
            };

            if byte == self.terminator {
                let line = String::from_utf8_lossy(&pending).trim_end().to_string();
                pending.clear();
                on_line(&line);
                let done = self.is_prompt(&line);
                lines.push(line);
                if done {
                    return Ok(lines);
                }
                continue;
            }

            pending.push(byte);
            if let Some(limit) = self.line_limit {
                if pending.len() > limit {
                    lines.push(String::from_utf8_lossy(&pending).to_string());
                    return Err(McushError::CommandTimeout {
                        command: None,
                        partial: Some(format!(
                            "line exceeds {} bytes: {}",
                            limit,
                            lines.join(" | ")
                        )),
                    });
                }
            }
            // prompts usually arrive without a trailing terminator
            let line = String::from_utf8_lossy(&pending);
            if self.is_prompt(&line) {
                let line = line.trim_end().to_string();
                on_line(&line);
                lines.push(line);
                return Ok(lines);
            }
        }
    }
}

fn timeout(lines: &[String], pending: &[u8]) -> McushError {
    let mut captured: Vec<String> = lines.to_vec();
    if !pending.is_empty() {
        captured.push(String::from_utf8_lossy(pending).trim_end().to_string());
    }
    McushError::CommandTimeout {
        command: None,
        partial: if captured.is_empty() {
            None
        } else {
            Some(captured.join(" | "))
        },
    }
}

/// Read one line, giving up at `deadline` if one is given.
///
/// Timeouts are not errors here: whatever arrived is returned.
pub fn read_line<T: Transport + ?Sized>(
    transport: &mut T,
    eol: u8,
    deadline: Option<Instant>,
) -> Result<String> {
    let mut chars: Vec<u8> = Vec::new();
    loop {
        match transport.read(1)?.first() {
            Some(&byte) if byte == eol => break,
            Some(&byte) => chars.push(byte),
            None => match deadline {
                Some(deadline) if Instant::now() < deadline => continue,
                _ => break,
            },
        }
    }
    Ok(String::from_utf8_lossy(&chars).trim_end().to_string())
}
