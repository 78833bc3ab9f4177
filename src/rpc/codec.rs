//! Command/acknowledgement wire codec for the data characteristic.
//!
//! Inbound write (host → device):
//! ```text
//! ┌──────────┬──────────────────────────────┐
//! │ Type (1B)│ Payload (0..=300 B)          │
//! └──────────┴──────────────────────────────┘
//! ```
//!
//! Outbound notify (device → host):
//! ```text
//! ┌──────────┬─────────────────┬──────────────────────┐
//! │ Type (1B)│ Length (2B, BE) │ Payload (Length B)   │
//! └──────────┴─────────────────┴──────────────────────┘
//! ```
//!
//! Most acknowledgements carry a single [`Reply`] byte. `GET_INFO` and
//! `GET_FINGER_NAMES` carry structured payloads built here.

use heapless::{String, Vec};

use crate::error::{Error, LinkError};

/// Largest payload in either direction.
pub const MAX_PAYLOAD: usize = 300;
/// Outbound header: type + big-endian length.
pub const HEADER_LEN: usize = 3;
/// Longest label stored per template, in bytes.
pub const LABEL_LEN: usize = 32;
/// Templates the sensor library can hold.
pub const MAX_TEMPLATES: usize = 50;

pub type Payload = Vec<u8, MAX_PAYLOAD>;
pub type Frame = Vec<u8, { MAX_PAYLOAD + HEADER_LEN }>;
pub type Label = String<LABEL_LEN>;

// ── Command types ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Search = 0x01,
    Register = 0x02,
    Delete = 0x03,
    DeviceNotify = 0x04,
    LockScreenStatus = 0x05,
    PutFinger = 0x06,
    RemoveFinger = 0x07,
    GetInfo = 0x08,
    RegisterCancel = 0x09,
    SetSleepTime = 0x10,
    SetFingerName = 0x20,
    GetFingerNames = 0x21,
    RenameFinger = 0x22,
    EnableSleep = 0x23,
    OtaStart = 0x24,
    OtaChunk = 0x25,
    OtaEnd = 0x26,
    CheckSleep = 0x27,
    ResetAll = 0x99,
}

impl Command {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Self::Search,
            0x02 => Self::Register,
            0x03 => Self::Delete,
            0x04 => Self::DeviceNotify,
            0x05 => Self::LockScreenStatus,
            0x06 => Self::PutFinger,
            0x07 => Self::RemoveFinger,
            0x08 => Self::GetInfo,
            0x09 => Self::RegisterCancel,
            0x10 => Self::SetSleepTime,
            0x20 => Self::SetFingerName,
            0x21 => Self::GetFingerNames,
            0x22 => Self::RenameFinger,
            0x23 => Self::EnableSleep,
            0x24 => Self::OtaStart,
            0x25 => Self::OtaChunk,
            0x26 => Self::OtaEnd,
            0x27 => Self::CheckSleep,
            0x99 => Self::ResetAll,
            _ => return None,
        })
    }

    /// Smallest payload the handler accepts.
    pub const fn min_payload(self) -> usize {
        match self {
            Self::Register | Self::Delete | Self::EnableSleep => 1,
            Self::SetFingerName | Self::RenameFinger => 2,
            Self::SetSleepTime | Self::OtaStart => 4,
            _ => 0,
        }
    }
}

/// Single-byte acknowledgement codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Failure = 0xA0,
    Success = 0xA1,
    Execute = 0xA2,
    Cancel = 0xA3,
}

impl Reply {
    pub fn from_result<T, E>(r: &Result<T, E>) -> Self {
        if r.is_ok() { Self::Success } else { Self::Failure }
    }
}

// ── Inbound frames ────────────────────────────────────────────

/// One inbound write, owned by the dispatcher queue until handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub kind: u8,
    pub payload: Payload,
    /// Payload length as written by the host, before truncation.
    pub declared_len: usize,
}

impl CommandFrame {
    /// Split a raw write into type and payload. Empty writes yield `None`;
    /// payload bytes beyond [`MAX_PAYLOAD`] are dropped.
    pub fn from_write(data: &[u8]) -> Option<Self> {
        let (&kind, rest) = data.split_first()?;
        let keep = rest.len().min(MAX_PAYLOAD);
        let payload = Vec::from_slice(&rest[..keep]).ok()?;
        Some(Self {
            kind,
            payload,
            declared_len: rest.len(),
        })
    }

    pub fn new(kind: u8, payload: &[u8]) -> Option<Self> {
        Some(Self {
            kind,
            payload: Vec::from_slice(payload).ok()?,
            declared_len: payload.len(),
        })
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_byte(self.kind)
    }

    pub fn is_truncated(&self) -> bool {
        self.declared_len > self.payload.len()
    }
}

// ── Outbound frames ───────────────────────────────────────────

/// Prefix `payload` with its type byte and big-endian length.
pub fn encode_frame(kind: u8, payload: &[u8]) -> Result<Frame, LinkError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge);
    }
    let mut out = Frame::new();
    let len = payload.len() as u16;
    out.push(kind).map_err(|_| LinkError::PayloadTooLarge)?;
    out.extend_from_slice(&len.to_be_bytes())
        .map_err(|()| LinkError::PayloadTooLarge)?;
    out.extend_from_slice(payload)
        .map_err(|()| LinkError::PayloadTooLarge)?;
    Ok(out)
}

// ── Payload parsers ───────────────────────────────────────────

/// Little-endian `u32` from the first four bytes.
pub fn read_u32_le(payload: &[u8]) -> Result<u32, Error> {
    payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(Error::BadPayload("expected u32"))
}

/// Bytes up to the first NUL (or the end).
pub fn c_str(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// `[id][name…]` where the name ends at NUL or end of payload.
pub fn parse_label(payload: &[u8]) -> Result<(u8, Label), Error> {
    let (&id, rest) = payload
        .split_first()
        .ok_or(Error::BadPayload("missing id"))?;
    let text = core::str::from_utf8(c_str(rest)).map_err(|_| Error::BadPayload("label not UTF-8"))?;
    let label = Label::try_from(text).map_err(|()| Error::BadPayload("label too long"))?;
    Ok((id, label))
}

/// Hex checksum text, read the way `strtoul(s, NULL, 16)` reads it:
/// leading whitespace, optional `0x`, then hex digits up to the first
/// other byte. Text with no digits is rejected.
pub fn parse_hex_u32(payload: &[u8]) -> Result<u32, Error> {
    let text = c_str(payload);
    let mut rest = text.trim_ascii_start();
    if let Some(r) = rest.strip_prefix(b"+") {
        rest = r;
    }
    if rest.len() > 2 && (rest.starts_with(b"0x") || rest.starts_with(b"0X")) && rest[2].is_ascii_hexdigit() {
        rest = &rest[2..];
    }
    let digits = rest.iter().take_while(|b| b.is_ascii_hexdigit()).count();
    if digits == 0 {
        return Err(Error::BadPayload("no hex digits"));
    }
    let mut value: u32 = 0;
    for &b in &rest[..digits] {
        let nibble = (b as char).to_digit(16).unwrap_or(0);
        value = match value.checked_mul(16).and_then(|v| v.checked_add(nibble)) {
            Some(v) => v,
            None => return Ok(u32::MAX),
        };
    }
    Ok(value)
}

// ── Structured replies ────────────────────────────────────────

pub const DEVICE_ID_LEN: usize = 20;
pub const BUILD_DATE_LEN: usize = 10;
pub const FIRMWARE_VERSION_LEN: usize = 10;
/// `sleep_time(4) + device_id(20) + build_date(10) + firmware_version(10)`
pub const DEVICE_INFO_LEN: usize = 4 + DEVICE_ID_LEN + BUILD_DATE_LEN + FIRMWARE_VERSION_LEN;

/// `GET_INFO` reply body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo<'a> {
    pub sleep_timeout_secs: u32,
    pub device_id: &'a str,
    pub build_date: &'a str,
    pub firmware_version: &'a str,
}

impl DeviceInfo<'_> {
    /// Fixed-layout encoding; text fields are NUL-padded and always
    /// keep at least one trailing NUL.
    pub fn encode(&self) -> [u8; DEVICE_INFO_LEN] {
        let mut out = [0u8; DEVICE_INFO_LEN];
        out[..4].copy_from_slice(&self.sleep_timeout_secs.to_le_bytes());
        let mut at = 4;
        for (text, width) in [
            (self.device_id, DEVICE_ID_LEN),
            (self.build_date, BUILD_DATE_LEN),
            (self.firmware_version, FIRMWARE_VERSION_LEN),
        ] {
            let n = text.len().min(width - 1);
            out[at..at + n].copy_from_slice(&text.as_bytes()[..n]);
            at += width;
        }
        out
    }
}

/// `index(1) + name(32)`
pub const RECORD_LEN: usize = 1 + LABEL_LEN;
/// Records that fit one outbound payload after the count byte.
pub const MAX_RECORDS: usize = (MAX_PAYLOAD - 1) / RECORD_LEN;

/// Reply byte for an index-table read failure.
pub const NAMES_READ_FAILED: u8 = 0xFF;

/// One `GET_FINGER_NAMES` page: count, then `{index, name[32]}` records.
/// Records beyond [`MAX_RECORDS`] are left out; use [`record_pages`].
pub fn encode_records(records: &[(u8, Label)]) -> Payload {
    let mut out = Payload::new();
    let n = records.len().min(MAX_RECORDS);
    let _ = out.push(n as u8);
    for (index, name) in &records[..n] {
        let _ = out.push(*index);
        let mut field = [0u8; LABEL_LEN];
        field[..name.len()].copy_from_slice(name.as_bytes());
        let _ = out.extend_from_slice(&field);
    }
    out
}

/// Split a names listing into pages of at most [`MAX_RECORDS`] records.
///
/// A page shorter than [`MAX_RECORDS`] ends the listing, so a listing that
/// fills its last page exactly is followed by an empty `[0]` page. Up to
/// eight records the reply is a single page.
pub fn record_pages(records: &[(u8, Label)]) -> impl Iterator<Item = Payload> + '_ {
    let pages = records.len() / MAX_RECORDS + 1;
    (0..pages).map(move |page| {
        let start = page * MAX_RECORDS;
        let end = (start + MAX_RECORDS).min(records.len());
        encode_records(&records[start..end])
    })
}
