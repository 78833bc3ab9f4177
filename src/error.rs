//! Unified error types for the FingerLock firmware.
//!
//! A single `Error` enum that every subsystem can convert into, so the
//! command engine can map any failure onto a FAILURE acknowledgement without
//! caring where it came from. All variants are `Copy` so they pass through
//! worker boundaries without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The fingerprint sensor failed or timed out.
    Sensor(SensorError),
    /// The wireless link refused or failed an operation.
    Link(LinkError),
    /// The firmware update pipeline failed.
    Ota(crate::rpc::ota::OtaError),
    /// Persistent storage failed.
    Storage(crate::app::ports::StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(crate::app::ports::ConfigError),
    /// A command payload was shorter than its type requires.
    BadPayload(&'static str),
    /// A single-flight workflow is already running.
    Busy,
    /// A bounded wait elapsed before its signal was set.
    Timeout(&'static str),
    /// A cancelable workflow observed its cancel flag.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Ota(e) => write!(f, "ota: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::BadPayload(what) => write!(f, "bad payload: {what}"),
            Self::Busy => write!(f, "busy"),
            Self::Timeout(what) => write!(f, "timed out waiting for {what}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// No response packet arrived within the timeout.
    Timeout,
    /// The response packet was malformed (header, length or checksum).
    BadPacket,
    /// The sensor answered with a non-zero confirmation code.
    Rejected(u8),
    /// No enrolled template matched the captured image.
    NoMatch,
    /// Writing to the serial line failed.
    WriteFailed,
    /// The sensor did not send its ready byte after power-up.
    NotReady,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "response timeout"),
            Self::BadPacket => write!(f, "malformed response"),
            Self::Rejected(code) => write!(f, "rejected (code 0x{code:02X})"),
            Self::NoMatch => write!(f, "no match"),
            Self::WriteFailed => write!(f, "serial write failed"),
            Self::NotReady => write!(f, "no ready signal"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No peer is connected.
    NotConnected,
    /// The outbound payload exceeds the frame limit.
    PayloadTooLarge,
    /// The radio stack rejected a call.
    Stack(i32),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::Stack(code) => write!(f, "radio stack error {code}"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<crate::rpc::ota::OtaError> for Error {
    fn from(e: crate::rpc::ota::OtaError) -> Self {
        Self::Ota(e)
    }
}

impl From<crate::app::ports::StorageError> for Error {
    fn from(e: crate::app::ports::StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<crate::app::ports::ConfigError> for Error {
    fn from(e: crate::app::ports::ConfigError) -> Self {
        Self::Config(e)
    }
}

impl std::error::Error for Error {}
impl std::error::Error for SensorError {}
impl std::error::Error for LinkError {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
