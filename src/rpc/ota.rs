//! Streaming firmware update: raw DEFLATE in, flash writes out.
//!
//! Flow: `start(total)` → N × `chunk(bytes)` → `finish(crc32)` → restart
//!
//! Compressed chunks are inflated into a fixed window with `miniz_oxide`'s
//! low-level decompressor. Output is appended at a cursor; once less than
//! [`RECYCLE_BELOW`] bytes remain, the last [`DICT_SIZE`] bytes move to
//! the start of the window so back-references stay valid.
//!
//! ```text
//!  window (64 KiB)
//! ┌───────────────────────────────┬──────────────────────────┬────┐
//! │ history ≥ 32 KiB              │ fresh output → cursor    │<4K │
//! └───────────────────────────────┴──────────────────────────┴────┘
//!                    recycle: copy [cursor-32K, cursor) → [0, 32K)
//! ```
//!
//! Every produced run is folded into a CRC-32 and written to the target
//! immediately. Any failure tears the session down and leaves the current
//! boot image in place.

use core::fmt;

use log::{info, warn};
use miniz_oxide::inflate::TINFLStatus;
use miniz_oxide::inflate::core::inflate_flags::{
    TINFL_FLAG_HAS_MORE_INPUT, TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF,
};
use miniz_oxide::inflate::core::{DecompressorOxide, decompress};

use super::crc32;
use crate::app::ports::FirmwareTarget;

/// DEFLATE dictionary size.
pub const DICT_SIZE: usize = 32 * 1024;
/// Decompression window: one dictionary of history plus as much headroom.
pub const WINDOW_LEN: usize = DICT_SIZE * 2;
/// Free space below which the window is recycled.
pub const RECYCLE_BELOW: usize = 4096;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    NotStarted,
    InvalidSize,
    EmptyChunk,
    NoMemory,
    NoPartition,
    BeginFailed,
    WriteFailed,
    /// Decompressor returned a negative status.
    Decompress(i8),
    /// End arrived before the compressed stream's final block.
    Incomplete,
    ChecksumMismatch { expected: u32, actual: u32 },
    VerifyFailed,
    BootSetFailed,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "no update session"),
            Self::InvalidSize => write!(f, "declared image size is zero"),
            Self::EmptyChunk => write!(f, "empty chunk"),
            Self::NoMemory => write!(f, "decompression window allocation failed"),
            Self::NoPartition => write!(f, "no inactive OTA partition available"),
            Self::BeginFailed => write!(f, "OTA begin failed"),
            Self::WriteFailed => write!(f, "OTA write failed"),
            Self::Decompress(status) => write!(f, "inflate failed (status {})", status),
            Self::Incomplete => write!(f, "compressed stream not finished"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "CRC32 mismatch (expected {:08X}, got {:08X})", expected, actual)
            }
            Self::VerifyFailed => write!(f, "image verification failed"),
            Self::BootSetFailed => write!(f, "set boot partition failed"),
        }
    }
}

// ── Session ───────────────────────────────────────────────────

struct Session {
    total: u32,
    received: u32,
    decompressed: u32,
    crc: u32,
    window: Vec<u8>,
    cursor: usize,
    inflater: Box<DecompressorOxide>,
    done: bool,
}

impl Session {
    fn open(total: u32) -> Result<Self, OtaError> {
        let mut window = Vec::new();
        window
            .try_reserve_exact(WINDOW_LEN)
            .map_err(|_| OtaError::NoMemory)?;
        window.resize(WINDOW_LEN, 0);
        Ok(Self {
            total,
            received: 0,
            decompressed: 0,
            crc: 0,
            window,
            cursor: 0,
            inflater: Box::default(),
            done: false,
        })
    }

    fn inflate(&mut self, data: &[u8], target: &mut impl FirmwareTarget) -> Result<(), OtaError> {
        self.received = self.received.saturating_add(data.len() as u32);
        let mut flags = TINFL_FLAG_USING_NON_WRAPPING_OUTPUT_BUF;
        if self.received < self.total {
            flags |= TINFL_FLAG_HAS_MORE_INPUT;
        }

        let mut input = data;
        while !self.done {
            if WINDOW_LEN - self.cursor < RECYCLE_BELOW {
                self.window.copy_within(self.cursor - DICT_SIZE..self.cursor, 0);
                self.cursor = DICT_SIZE;
            }

            let (status, used, produced) =
                decompress(&mut self.inflater, input, &mut self.window, self.cursor, flags);
            input = &input[used..];

            if (status as i8) < 0 {
                return Err(OtaError::Decompress(status as i8));
            }

            if produced > 0 {
                let out = &self.window[self.cursor..self.cursor + produced];
                self.crc = crc32::update(self.crc, out);
                target.write(out)?;
                self.decompressed += produced as u32;
                self.cursor += produced;
            }

            match status {
                TINFLStatus::Done => self.done = true,
                TINFLStatus::HasMoreOutput => {}
                _ if input.is_empty() || (used == 0 && produced == 0) => break,
                _ => {}
            }
        }

        if self.done && !input.is_empty() {
            warn!("OTA: {} trailing bytes after end of stream", input.len());
        }
        Ok(())
    }
}

// ── Engine ────────────────────────────────────────────────────

/// Single-instance update pipeline over one [`FirmwareTarget`].
pub struct UpdateEngine<T: FirmwareTarget> {
    target: T,
    session: Option<Session>,
}

impl<T: FirmwareTarget> UpdateEngine<T> {
    pub fn new(target: T) -> Self {
        Self { target, session: None }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn bytes_received(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.received)
    }

    pub fn bytes_decompressed(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.decompressed)
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Open a session for an image of `total` compressed bytes. A session
    /// that is still open is torn down first.
    pub fn start(&mut self, total: u32) -> Result<(), OtaError> {
        if self.session.is_some() {
            warn!("OTA: discarding stale session");
            self.abort();
        }
        if total == 0 {
            return Err(OtaError::InvalidSize);
        }

        let session = Session::open(total)?;
        self.target.begin()?;
        self.session = Some(session);
        info!("OTA: begin ({} compressed bytes)", total);
        Ok(())
    }

    /// Feed one compressed chunk.
    pub fn chunk(&mut self, data: &[u8]) -> Result<(), OtaError> {
        let session = self.session.as_mut().ok_or(OtaError::NotStarted)?;
        if data.is_empty() {
            self.abort();
            return Err(OtaError::EmptyChunk);
        }

        let result = session.inflate(data, &mut self.target);
        match result {
            Ok(()) => {
                log::debug!(
                    "OTA: {}/{} received, {} inflated",
                    session.received,
                    session.total,
                    session.decompressed
                );
                Ok(())
            }
            Err(e) => {
                warn!("OTA: chunk failed: {}", e);
                self.abort();
                Err(e)
            }
        }
    }

    /// Verify the inflated image against `expected` and make it the next
    /// boot target. On mismatch the partial image is discarded.
    pub fn finish(&mut self, expected: u32) -> Result<(), OtaError> {
        let session = self.session.take().ok_or(OtaError::NotStarted)?;
        info!(
            "OTA: end ({} received, {} inflated, crc {:08X})",
            session.received, session.decompressed, session.crc
        );
        drop(session.window);

        if !session.done {
            self.target.abort();
            return Err(OtaError::Incomplete);
        }
        if session.crc != expected {
            self.target.abort();
            return Err(OtaError::ChecksumMismatch {
                expected,
                actual: session.crc,
            });
        }
        self.target.commit()?;
        info!("OTA: image committed, next boot uses the new firmware");
        Ok(())
    }

    /// Drop the session and the partial image.
    pub fn abort(&mut self) {
        if self.session.take().is_some() {
            self.target.abort();
            warn!("OTA: aborted");
        }
    }
}

// ── Boot validation ───────────────────────────────────────────

/// Mark the running image valid so the bootloader does not roll back.
#[cfg(target_os = "espidf")]
pub fn check_rollback() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn check_rollback() {
    log::info!("OTA rollback check (simulation): skipped");
}

// ── Tests ─────────────────────────────────────────────────────
