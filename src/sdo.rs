//! SDO client: object-dictionary upload and download over a [`CanBus`].
//!
//! Transfers of up to four bytes ride inline in the initiate frame
//! (expedited); longer ones continue in 7-byte segments whose toggle bit
//! alternates 0, 1, 0, ... A response is only taken for the segment it
//! answers when its toggle equals the one sent, so duplicates and stale
//! retransmissions on the bus are skipped rather than consumed.
//!
//! Every wait is bounded by the client timeout. Frames for other
//! identifiers, remote frames and frames not 8 bytes long are ignored, as
//! are initiate responses and aborts addressing another object: they belong
//! to other traffic on the shared bus.

use crate::can::CanBus;
use crate::constants::*;
use crate::error::{McushError, Result};
use crate::types::{CanFrame, SdoObjectRef, SdoTransferMode, SegmentToggle};
use log::{debug, warn};
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Total length assumed when an upload does not indicate its size
pub const SDO_UNKNOWN_SIZE: usize = 0x00FF_FFFF;

/// Abort code sent to the server when a wait runs out
pub const ABORT_TIMED_OUT: u32 = 0x0504_0000;

/// Command byte of an expedited initiate-download carrying `len` (1..=4) bytes.
///
/// `0x20 | e | s | (4 - len) << 2`, e.g. `0x2B` for two bytes.
pub fn expedited_download_control(len: usize) -> u8 {
    debug_assert!((1..=SDO_EXPEDITED_MAX).contains(&len));
    let not_used = (SDO_EXPEDITED_MAX - len) as u8;
    SDO_CCS_INITIATE_DOWNLOAD | SDO_EXPEDITED | SDO_SIZE_INDICATED | (not_used << 2)
}

/// Command byte of a download segment carrying `len` (1..=7) bytes.
pub fn download_segment_control(len: usize, last: bool, toggle: SegmentToggle) -> u8 {
    debug_assert!((1..=SDO_SEGMENT_PAYLOAD).contains(&len));
    let not_used = (SDO_SEGMENT_PAYLOAD - len) as u8;
    let mut control = SDO_CCS_DOWNLOAD_SEGMENT | toggle.bits() | (not_used << 1);
    if last {
        control |= SDO_NO_MORE;
    }
    control
}

/// Command byte of an upload segment request.
pub fn upload_segment_control(toggle: SegmentToggle) -> u8 {
    SDO_CCS_UPLOAD_SEGMENT | toggle.bits()
}

fn is_abort(control: u8) -> bool {
    control & SDO_ABORT != 0
}

// Initiate responses never answer a segment request.
fn is_initiate_response(control: u8) -> bool {
    matches!(
        control & SDO_CS_MASK,
        SDO_SCS_INITIATE_UPLOAD | SDO_SCS_INITIATE_DOWNLOAD
    )
}

/// Human-readable CiA-301 abort code
pub fn abort_code_description(code: u32) -> &'static str {
    match code {
        0x0503_0000 => "Toggle bit not alternated",
        0x0504_0000 => "SDO protocol timed out",
        0x0504_0001 => "Client/server command specifier not valid or unknown",
        0x0504_0005 => "Out of memory",
        0x0601_0000 => "Unsupported access to an object",
        0x0601_0001 => "Attempt to read a write only object",
        0x0601_0002 => "Attempt to write a read only object",
        0x0602_0000 => "Object does not exist in the object dictionary",
        0x0604_0041 => "Object cannot be mapped to the PDO",
        0x0604_0042 => "The number and length of the objects to be mapped would exceed PDO length",
        0x0604_0043 => "General parameter incompatibility reason",
        0x0604_0047 => "General internal incompatibility in the device",
        0x0606_0000 => "Access failed due to a hardware error",
        0x0607_0010 => "Data type does not match, length of service parameter does not match",
        0x0607_0012 => "Data type does not match, length of service parameter too high",
        0x0607_0013 => "Data type does not match, length of service parameter too low",
        0x0609_0011 => "Sub-index does not exist",
        0x0609_0030 => "Value range of parameter exceeded (only for write access)",
        0x0609_0031 => "Value of parameter written too high",
        0x0609_0032 => "Value of parameter written too low",
        0x0609_0036 => "Maximum value is less than minimum value",
        0x0800_0000 => "General error",
        0x0800_0020 => "Data cannot be transferred or stored to the application",
        0x0800_0021 => {
            "Data cannot be transferred or stored to the application because of local control"
        }
        0x0800_0022 => {
            "Data cannot be transferred or stored to the application because of the present device state"
        }
        _ => "Unknown abort code",
    }
}

fn check_abort(obj: &SdoObjectRef, data: &[u8]) -> Result<()> {
    if !is_abort(data[0]) {
        return Ok(());
    }
    let code = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    Err(McushError::SdoAbort {
        node: obj.node_id(),
        index: obj.index,
        subindex: obj.subindex,
        code,
        description: abort_code_description(code).to_string(),
    })
}

/// Fixed-size little-endian values stored in the object dictionary
pub trait ObjectValue: Sized {
    const SIZE: usize;
    fn from_le_slice(bytes: &[u8]) -> Option<Self>;
    fn to_le_vec(&self) -> Vec<u8>;
}

macro_rules! object_value {
    ($($t:ty),*) => {
        $(
            impl ObjectValue for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_le_slice(bytes: &[u8]) -> Option<Self> {
                    let raw = bytes.get(..Self::SIZE)?.try_into().ok()?;
                    Some(<$t>::from_le_bytes(raw))
                }

                fn to_le_vec(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

object_value!(u8, i8, u16, i16, u32, i32, f32);

/// Blocking SDO client, one transaction at a time
pub struct SdoClient<B: CanBus> {
    bus: B,
    // polled but not yet examined
    backlog: VecDeque<CanFrame>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<B: CanBus> SdoClient<B> {
    pub fn new(bus: B) -> Self {
        SdoClient {
            bus,
            backlog: VecDeque::new(),
            timeout: DEFAULT_SDO_TIMEOUT,
            poll_interval: DEFAULT_SDO_POLL_INTERVAL,
        }
    }

    /// Budget for each response wait
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleep between empty polls
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Duration {
        std::mem::replace(&mut self.timeout, timeout)
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Read object `index:subindex` of `node`.
    pub fn read_object(&mut self, node: u8, index: u16, subindex: u8) -> Result<Vec<u8>> {
        let obj = SdoObjectRef::new(node, index, subindex)?;
        self.upload(&obj)
    }

    /// Write `data` to object `index:subindex` of `node`.
    pub fn write_object(&mut self, node: u8, index: u16, subindex: u8, data: &[u8]) -> Result<()> {
        let obj = SdoObjectRef::new(node, index, subindex)?;
        self.download(&obj, data)
    }

    pub fn read_value<V: ObjectValue>(&mut self, node: u8, index: u16, subindex: u8) -> Result<V> {
        let data = self.read_object(node, index, subindex)?;
        V::from_le_slice(&data).ok_or_else(|| {
            McushError::Parse(format!(
                "{:#06x}:{:#04x} returned {} bytes, expected {}",
                index,
                subindex,
                data.len(),
                V::SIZE
            ))
        })
    }

    pub fn write_value<V: ObjectValue>(
        &mut self,
        node: u8,
        index: u16,
        subindex: u8,
        value: V,
    ) -> Result<()> {
        self.write_object(node, index, subindex, &value.to_le_vec())
    }

    /// VISIBLE_STRING object, trailing NULs dropped
    pub fn read_string(&mut self, node: u8, index: u16, subindex: u8) -> Result<String> {
        let data = self.read_object(node, index, subindex)?;
        Ok(String::from_utf8_lossy(&data).trim_end_matches('\0').to_string())
    }

    /// Tell the server to drop the transfer on `obj`.
    pub fn abort(&mut self, obj: &SdoObjectRef, code: u32) -> Result<()> {
        let mut data = [0u8; SDO_FRAME_LEN];
        data[0] = SDO_ABORT;
        self.put_multiplexer(obj, &mut data);
        data[4..].copy_from_slice(&code.to_le_bytes());
        self.send(obj, &data)
    }

    /// Upload (read) one object, expedited or segmented as the server chooses.
    pub fn upload(&mut self, obj: &SdoObjectRef) -> Result<Vec<u8>> {
        self.backlog.clear();
        let mut request = [0u8; SDO_FRAME_LEN];
        request[0] = SDO_CCS_INITIATE_UPLOAD;
        self.put_multiplexer(obj, &mut request);
        self.send(obj, &request)?;

        let target = *obj;
        let response = self.wait_for(obj, "upload initiate", |data| {
            if !target.matches(data) {
                return Ok(false);
            }
            check_abort(&target, data)?;
            Ok(true)
        })?;

        let control = response[0];
        let size_indicated = control & SDO_SIZE_INDICATED != 0;
        if control & SDO_EXPEDITED != 0 {
            let not_used = if size_indicated {
                ((control >> 2) & 0x03) as usize
            } else {
                0
            };
            let value = response[4..SDO_FRAME_LEN - not_used].to_vec();
            debug!(
                "SDO node {} {:#06x}:{:#04x} expedited upload {:02X?}",
                obj.node_id(),
                obj.index,
                obj.subindex,
                value
            );
            return Ok(value);
        }

        let mode = SdoTransferMode::Segmented {
            total_len: size_indicated
                .then(|| u32::from_le_bytes([response[4], response[5], response[6], response[7]])),
        };
        debug!(
            "SDO node {} {:#06x}:{:#04x} {:?}",
            obj.node_id(),
            obj.index,
            obj.subindex,
            mode
        );
        let total = match mode {
            SdoTransferMode::Segmented {
                total_len: Some(len),
            } => len as usize,
            _ => SDO_UNKNOWN_SIZE,
        };
        self.upload_segments(obj, total)
    }

    fn upload_segments(&mut self, obj: &SdoObjectRef, mut total: usize) -> Result<Vec<u8>> {
        let mut read: Vec<u8> = Vec::with_capacity(total.min(4096));
        let mut toggle = SegmentToggle::new();
        while read.len() < total {
            let mut request = [0u8; SDO_FRAME_LEN];
            request[0] = upload_segment_control(toggle);
            self.send(obj, &request)?;

            let target = *obj;
            let expected = toggle;
            let segment = self.wait_for(obj, "upload segment", |data| {
                check_abort(&target, data)?;
                Ok(!is_initiate_response(data[0]) && expected.matches(data[0]))
            })?;

            let control = segment[0];
            let not_used = ((control >> 1) & 0x07) as usize;
            read.extend_from_slice(&segment[1..SDO_FRAME_LEN - not_used]);
            if control & SDO_NO_MORE != 0 {
                total = read.len();
            }
            toggle.flip();
        }
        read.truncate(total);
        debug!(
            "SDO node {} {:#06x}:{:#04x} segmented upload {} bytes",
            obj.node_id(),
            obj.index,
            obj.subindex,
            read.len()
        );
        Ok(read)
    }

    /// Download (write) one object; up to 4 bytes go expedited.
    pub fn download(&mut self, obj: &SdoObjectRef, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(McushError::InvalidFrame(
                "SDO download needs at least one byte".to_string(),
            ));
        }
        let mode = SdoTransferMode::for_payload(data.len())?;
        self.backlog.clear();
        let mut request = [0u8; SDO_FRAME_LEN];
        self.put_multiplexer(obj, &mut request);
        match mode {
            SdoTransferMode::Expedited { len } => {
                request[0] = expedited_download_control(len as usize);
                request[4..4 + data.len()].copy_from_slice(data);
            }
            SdoTransferMode::Segmented { total_len } => {
                request[0] = SDO_CCS_INITIATE_DOWNLOAD | SDO_SIZE_INDICATED;
                request[4..].copy_from_slice(&total_len.unwrap_or_default().to_le_bytes());
            }
        }
        debug!(
            "SDO node {} {:#06x}:{:#04x} download {:?}",
            obj.node_id(),
            obj.index,
            obj.subindex,
            mode
        );
        self.send(obj, &request)?;

        let target = *obj;
        self.wait_for(obj, "download initiate", |data| {
            if !target.matches(data) {
                return Ok(false);
            }
            check_abort(&target, data)?;
            Ok(true)
        })?;

        if let SdoTransferMode::Segmented { .. } = mode {
            self.download_segments(obj, data)?;
        }
        Ok(())
    }

    fn download_segments(&mut self, obj: &SdoObjectRef, data: &[u8]) -> Result<()> {
        let mut toggle = SegmentToggle::new();
        let mut written = 0;
        while written < data.len() {
            let chunk = &data[written..data.len().min(written + SDO_SEGMENT_PAYLOAD)];
            let last = written + chunk.len() >= data.len();
            let mut request = [0u8; SDO_FRAME_LEN];
            request[0] = download_segment_control(chunk.len(), last, toggle);
            request[1..1 + chunk.len()].copy_from_slice(chunk);
            self.send(obj, &request)?;

            let target = *obj;
            let expected = toggle;
            self.wait_for(obj, "download segment", |data| {
                check_abort(&target, data)?;
                Ok(!is_initiate_response(data[0]) && expected.matches(data[0]))
            })?;

            toggle.flip();
            written += chunk.len();
        }
        Ok(())
    }

    fn put_multiplexer(&self, obj: &SdoObjectRef, data: &mut [u8; SDO_FRAME_LEN]) {
        data[1..3].copy_from_slice(&obj.index.to_le_bytes());
        data[3] = obj.subindex;
    }

    fn send(&mut self, obj: &SdoObjectRef, data: &[u8; SDO_FRAME_LEN]) -> Result<()> {
        let frame = CanFrame::new(obj.request_id(), data)?;
        debug!("SDO tx {:03X} {:02X?}", frame.id(), data);
        self.bus.send(&frame)
    }

    /// Poll until `accept` takes a response frame of `obj` or the timeout passes.
    ///
    /// `accept` sees only 8-byte data frames on the response identifier;
    /// returning `Ok(false)` keeps waiting, an error ends the transfer.
    fn wait_for<F>(
        &mut self,
        obj: &SdoObjectRef,
        stage: &'static str,
        mut accept: F,
    ) -> Result<[u8; SDO_FRAME_LEN]>
    where
        F: FnMut(&[u8]) -> Result<bool>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            let polled = self.bus.poll()?;
            self.backlog.extend(polled);
            while let Some(frame) = self.backlog.pop_front() {
                if frame.id() != obj.response_id()
                    || frame.is_extended()
                    || frame.is_remote()
                    || frame.data().len() != SDO_FRAME_LEN
                {
                    continue;
                }
                debug!("SDO rx {:03X} {:02X?}", frame.id(), frame.data());
                if accept(frame.data())? {
                    let mut data = [0u8; SDO_FRAME_LEN];
                    data.copy_from_slice(frame.data());
                    return Ok(data);
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(self.poll_interval);
        }

        warn!(
            "SDO node {} {:#06x}:{:#04x}: no response ({})",
            obj.node_id(),
            obj.index,
            obj.subindex,
            stage
        );
        if let Err(e) = self.abort(obj, ABORT_TIMED_OUT) {
            warn!("SDO abort after timeout failed: {}", e);
        }
        Err(McushError::SdoTimeout {
            node: obj.node_id(),
            index: obj.index,
            subindex: obj.subindex,
            stage,
        })
    }
}
