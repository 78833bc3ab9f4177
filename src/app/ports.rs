//! Port traits: the hexagonal boundary between orchestration logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ workers (link, dispatcher, power, unlock)
//! ```
//!
//! Driven adapters (fingerprint sensor, radio, platform, storage) implement
//! these traits. Workers run on separate threads, so every port that is
//! shared between them is `Send`, and the ones reached from radio callbacks
//! take `&self` and are `Sync` as well.
//!
//! ## Security notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **RadioPort::clear_bonds** is the only way bonded peers are forgotten;
//!   link-layer key validation stays inside the radio stack.

use std::sync::{Arc, Mutex};

use crate::config::DeviceConfig;
use crate::error::{LinkError, SensorError};

// ───────────────────────────────────────────────────────────────
// Fingerprint sensor port (driven adapter: domain ↔ sensor module)
// ───────────────────────────────────────────────────────────────

/// Character-buffer slot used for captures that are searched or stored.
pub const PRIMARY_SLOT: u8 = 1;

/// Size of the sensor's template index bitmap in bytes.
pub const INDEX_TABLE_LEN: usize = 32;

/// Template index bitmap: bit `j` of byte `i` marks template `i * 8 + j` as enrolled.
pub type IndexTable = [u8; INDEX_TABLE_LEN];

/// Ring-light command understood by the sensor module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedCommand {
    pub mode: LedMode,
    pub start_color: u8,
    /// End colour, or the on/off duty nibbles for [`LedMode::Blink`].
    pub end_color: u8,
    /// 0 = repeat forever.
    pub loops: u8,
    /// Optional period in 100 ms units.
    pub period: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LedMode {
    Breath = 0x01,
    Blink = 0x02,
    On = 0x03,
    Off = 0x04,
}

/// Operations the orchestration layer sequences on the fingerprint module.
///
/// Every call is one request/response exchange; none of them retry.
pub trait SensorPort: Send {
    /// Switch the module's supply rail.
    fn set_power(&mut self, on: bool);

    /// Block until the module reports it finished booting.
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<(), SensorError>;

    /// Level of the module's touch line (high while a finger rests on it).
    fn finger_present(&self) -> bool;

    /// Capture an image into the module's image buffer.
    fn capture(&mut self) -> Result<(), SensorError>;

    /// Extract features from the image buffer into character slot `slot`.
    fn extract(&mut self, slot: u8) -> Result<(), SensorError>;

    /// Merge the filled character slots into one template.
    fn merge(&mut self) -> Result<(), SensorError>;

    /// Store the merged template at library position `id`.
    fn store(&mut self, id: u16) -> Result<(), SensorError>;

    /// Search the library with character slot `slot`; returns the matched id.
    fn search(&mut self, slot: u8) -> Result<u16, SensorError>;

    /// Delete the template at `id`.
    fn delete(&mut self, id: u16) -> Result<(), SensorError>;

    /// Delete every stored template.
    fn clear_library(&mut self) -> Result<(), SensorError>;

    /// Read the enrolled-template bitmap.
    fn read_index(&mut self) -> Result<IndexTable, SensorError>;

    /// Drive the ring light.
    fn set_led(&mut self, cmd: LedCommand) -> Result<(), SensorError>;
}

/// Sensor handle shared between the dispatcher, the match loop and power management.
pub type SharedSensor = Arc<Mutex<dyn SensorPort>>;

// ───────────────────────────────────────────────────────────────
// Radio port (driven adapter: domain ↔ BLE stack)
// ───────────────────────────────────────────────────────────────

/// 48-bit device address, least significant byte first.
pub type Address = [u8; 6];

/// Calls into the wireless stack. All methods are non-reentrant-safe
/// and MUST NOT be invoked from inside a radio callback.
pub trait RadioPort: Send + Sync {
    /// Begin connectable advertising.
    fn start_advertising(&self) -> Result<(), LinkError>;

    /// Stop advertising.
    fn stop_advertising(&self) -> Result<(), LinkError>;

    /// Drop the current connection, if any.
    fn disconnect(&self) -> Result<(), LinkError>;

    /// Number of bonded peers remembered by the stack.
    fn bonded_count(&self) -> usize;

    /// Forget every bonded peer.
    fn clear_bonds(&self) -> Result<(), LinkError>;

    /// Use `addr` as the static random address for subsequent advertising.
    fn set_address(&self, addr: Address) -> Result<(), LinkError>;

    /// Produce a fresh static random address.
    fn generate_address(&self) -> Address;

    /// Write `frame` to the data characteristic and notify the subscriber.
    fn notify(&self, frame: &[u8]) -> Result<(), LinkError>;

    /// Press and release the wake key on the keyboard profile.
    fn send_wake_key(&self) -> Result<(), LinkError>;
}

/// Framed application messages towards the host.
///
/// Implemented by the link: the frame is sent under an exclusive lock and
/// fails with [`LinkError::NotConnected`] when no host is attached.
pub trait ReplySink: Send + Sync {
    fn send(&self, kind: u8, payload: &[u8]) -> Result<(), LinkError>;

    /// Single reply-code acknowledgement.
    fn ack(&self, kind: u8, code: u8) -> Result<(), LinkError> {
        self.send(kind, &[code])
    }
}

// ───────────────────────────────────────────────────────────────
// Indicator port (driven adapter: domain → ring light)
// ───────────────────────────────────────────────────────────────

/// User-visible device states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indication {
    /// Advertising with no bonded peer: fast white blink.
    Pairing,
    /// Advertising for the bonded host to reconnect.
    Reconnecting,
    /// Not advertising and not connected.
    Idle,
    /// A host connected.
    Connected,
    /// The bonded-peer count changed after pairing.
    Bonded,
    /// The host subscribed to notifications.
    Subscribed,
    /// The link dropped.
    Disconnected,
    /// Light off.
    Off,
}

/// Side channel for state changes. Implementations must not block.
pub trait IndicatorPort: Send + Sync {
    fn show(&self, indication: Indication);
}

// ───────────────────────────────────────────────────────────────
// Platform port (driven adapter: domain ↔ SoC services)
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Which line brought the processor out of light sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    Touch,
    Button,
}

pub trait PlatformPort: Send + Sync {
    /// Route the touch line's rising edge to the match trigger.
    fn attach_touch_irq(&self);

    /// Stop delivering touch interrupts.
    fn detach_touch_irq(&self);

    /// Enter light sleep until the touch line goes high or the button line goes low.
    fn light_sleep(&self) -> WakeCause;

    /// Reboot into whichever image is marked for boot.
    fn restart(&self);
}

// ───────────────────────────────────────────────────────────────
// Worker control (driven adapter: power manager → input workers)
// ───────────────────────────────────────────────────────────────

/// A background worker that can be parked across sleep.
pub trait WorkerControl: Send + Sync {
    /// Re-arm the worker; a press already held at this point must still be seen.
    fn resume(&self);

    /// Park the worker and detach its interrupt.
    fn suspend(&self);
}

// ───────────────────────────────────────────────────────────────
// Firmware target port (driven adapter: update engine ↔ flash)
// ───────────────────────────────────────────────────────────────

/// Inactive application partition being rewritten by an update.
pub trait FirmwareTarget: Send {
    /// Open the next update partition for writing.
    fn begin(&mut self) -> Result<(), crate::rpc::ota::OtaError>;

    /// Append decompressed image bytes.
    fn write(&mut self, data: &[u8]) -> Result<(), crate::rpc::ota::OtaError>;

    /// Discard the partial image; the current boot target stays active.
    fn abort(&mut self);

    /// Finalise the image and mark it as the next boot target.
    fn commit(&mut self) -> Result<(), crate::rpc::ota::OtaError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists device configuration.
///
/// # Security
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`DeviceConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<DeviceConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for labels, the cached address and config.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic; no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively; in-memory simulation
///   achieves it trivially.
pub trait StoragePort: Send {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;

    /// Remove every key in `namespace`.
    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError>;
}

/// Storage handle shared by the label store, the link and the config layer.
pub type SharedStorage = Arc<Mutex<dyn StoragePort>>;

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Value does not fit the caller's buffer or the backend's limits.
    TooLarge,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::TooLarge => write!(f, "value too large"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
