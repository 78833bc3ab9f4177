//! Fingerprint module adapter.
//!
//! The module speaks a framed request/acknowledge protocol on a UART:
//!
//! ```text
//! ┌──────┬───────────┬─────┬────────┬──────┬──────────┬──────────┐
//! │ EF01 │ FFFFFFFF  │ pid │ len BE │ code │ params…  │ sum BE   │
//! └──────┴───────────┴─────┴────────┴──────┴──────────┴──────────┘
//!   2        4          1      2       1     len - 3       2
//! ```
//!
//! `len` counts everything after itself, checksum included. The checksum
//! is the 16-bit wrapping sum of `pid`, both length bytes, the code and
//! the parameters. Acknowledgements carry pid `0x07` and a confirmation
//! code in place of the command code. After power-up the module emits a
//! single `0x55` once it is ready.
//!
//! [`ModuleSensor`] runs that protocol over any [`SerialLink`];
//! [`SimSensor`] is a scriptable stand-in for host builds and tests, and
//! [`SensorIndicator`] drives the ring light without blocking callers.

use std::sync::{Mutex, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use heapless::Vec as HVec;
use log::{debug, warn};

use crate::app::ports::{
    INDEX_TABLE_LEN, Indication, IndexTable, IndicatorPort, LedCommand, LedMode, SensorPort,
    SharedSensor,
};
use crate::error::SensorError;

// ── Packet codec ──────────────────────────────────────────────

const HEADER: [u8; 2] = [0xEF, 0x01];
const ADDRESS: [u8; 4] = [0xFF; 4];
const PID_COMMAND: u8 = 0x01;
const PID_ACK: u8 = 0x07;
/// Header, address, pid and length.
const HEAD_LEN: usize = 9;
/// Smallest valid acknowledgement: head, confirmation code, checksum.
const MIN_ACK_LEN: usize = HEAD_LEN + 3;

/// Byte sent by the module once it finished booting.
pub const READY_BYTE: u8 = 0x55;
/// Largest packet exchanged with the module (index table reply).
pub const MAX_PACKET: usize = 48;
/// Template positions addressed by searches.
pub const LIBRARY_CAPACITY: u16 = 50;

pub type Packet = HVec<u8, MAX_PACKET>;

mod op {
    pub const GET_IMAGE: u8 = 0x01;
    pub const GEN_CHAR: u8 = 0x02;
    pub const SEARCH: u8 = 0x04;
    pub const REG_MODEL: u8 = 0x05;
    pub const STORE_CHAR: u8 = 0x06;
    pub const DELETE_CHAR: u8 = 0x0C;
    pub const CLEAR_LIB: u8 = 0x0D;
    pub const READ_INDEX: u8 = 0x1F;
    pub const LED: u8 = 0x3C;
}

const CONFIRM_OK: u8 = 0x00;
const CONFIRM_NO_MATCH: u8 = 0x09;

fn checksum(body: &[u8]) -> u16 {
    body.iter().fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Build a command packet.
pub fn encode_command(code: u8, params: &[u8]) -> Result<Packet, SensorError> {
    let len = (params.len() + 3) as u16;
    let mut p = Packet::new();
    p.extend_from_slice(&HEADER).map_err(|()| SensorError::BadPacket)?;
    p.extend_from_slice(&ADDRESS).map_err(|()| SensorError::BadPacket)?;
    p.extend_from_slice(&[PID_COMMAND, (len >> 8) as u8, len as u8, code])
        .map_err(|()| SensorError::BadPacket)?;
    p.extend_from_slice(params).map_err(|()| SensorError::BadPacket)?;
    let sum = checksum(&p[6..]);
    p.extend_from_slice(&sum.to_be_bytes())
        .map_err(|()| SensorError::BadPacket)?;
    Ok(p)
}

/// Total packet length announced by a complete head.
fn frame_len(head: &[u8]) -> Result<usize, SensorError> {
    if head.len() < HEAD_LEN || head[..2] != HEADER {
        return Err(SensorError::BadPacket);
    }
    let len = usize::from(u16::from_be_bytes([head[7], head[8]]));
    if len < 3 || HEAD_LEN + len > MAX_PACKET {
        return Err(SensorError::BadPacket);
    }
    Ok(HEAD_LEN + len)
}

/// A validated acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack<'a> {
    pub confirm: u8,
    pub data: &'a [u8],
}

impl<'a> Ack<'a> {
    /// Map the confirmation code onto a result carrying the data bytes.
    pub fn into_result(self) -> Result<&'a [u8], SensorError> {
        match self.confirm {
            CONFIRM_OK => Ok(self.data),
            CONFIRM_NO_MATCH => Err(SensorError::NoMatch),
            code => Err(SensorError::Rejected(code)),
        }
    }
}

/// Validate header, pid, length and checksum of an acknowledgement.
pub fn decode_ack(packet: &[u8]) -> Result<Ack<'_>, SensorError> {
    if packet.len() < MIN_ACK_LEN {
        return Err(SensorError::BadPacket);
    }
    let total = frame_len(packet)?;
    if packet.len() < total || packet[6] != PID_ACK {
        return Err(SensorError::BadPacket);
    }
    let sum = u16::from_be_bytes([packet[total - 2], packet[total - 1]]);
    if checksum(&packet[6..total - 2]) != sum {
        return Err(SensorError::BadPacket);
    }
    Ok(Ack {
        confirm: packet[9],
        data: &packet[10..total - 2],
    })
}

// ── Serial transport ──────────────────────────────────────────

/// Byte stream to the module.
pub trait SerialLink: Send {
    fn write_all(&mut self, data: &[u8]) -> Result<(), SensorError>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms` for data.
    /// Returns 0 on timeout.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> usize;

    /// Drop any unread input.
    fn clear_input(&mut self);
}

#[cfg(target_os = "espidf")]
pub struct UartLink {
    uart: esp_idf_hal::uart::UartDriver<'static>,
}

#[cfg(target_os = "espidf")]
impl UartLink {
    pub fn new(uart: esp_idf_hal::uart::UartDriver<'static>) -> Self {
        Self { uart }
    }
}

#[cfg(target_os = "espidf")]
impl SerialLink for UartLink {
    fn write_all(&mut self, mut data: &[u8]) -> Result<(), SensorError> {
        while !data.is_empty() {
            match self.uart.write(data) {
                Ok(0) | Err(_) => return Err(SensorError::WriteFailed),
                Ok(n) => data = &data[n..],
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> usize {
        let ticks = esp_idf_hal::delay::TickType::new_millis(u64::from(timeout_ms)).ticks();
        self.uart.read(buf, ticks).unwrap_or(0)
    }

    fn clear_input(&mut self) {
        if let Err(e) = self.uart.clear_rx() {
            warn!("Sensor: rx flush failed: {:?}", e);
        }
    }
}

// ── Protocol driver ───────────────────────────────────────────

const RESPONSE_TIMEOUT_MS: u32 = 500;
const INDEX_TIMEOUT_MS: u32 = 1_000;
const POWER_SETTLE: Duration = Duration::from_millis(100);

/// Sensor module on a serial link, with its supply switch and touch line.
pub struct ModuleSensor<L: SerialLink> {
    link: L,
    power_pin: i32,
    touch_pin: i32,
}

impl<L: SerialLink> ModuleSensor<L> {
    pub fn new(link: L, power_pin: i32, touch_pin: i32) -> Self {
        Self {
            link,
            power_pin,
            touch_pin,
        }
    }

    /// Read exactly `buf.len()` bytes before `deadline`.
    fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> Result<(), SensorError> {
        let mut filled = 0;
        while filled < buf.len() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(SensorError::Timeout);
            }
            let ms = left.as_millis().min(u128::from(u32::MAX)) as u32;
            filled += self.link.read(&mut buf[filled..], ms.max(1));
        }
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<Packet, SensorError> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut buf = [0u8; MAX_PACKET];
        self.read_exact(&mut buf[..HEAD_LEN], deadline)?;
        let total = frame_len(&buf[..HEAD_LEN])?;
        self.read_exact(&mut buf[HEAD_LEN..total], deadline)?;
        Packet::from_slice(&buf[..total]).map_err(|()| SensorError::BadPacket)
    }

    /// One request/acknowledge exchange. Returns the acknowledgement's data.
    fn exchange(&mut self, code: u8, params: &[u8], timeout_ms: u32) -> Result<Packet, SensorError> {
        let request = encode_command(code, params)?;
        self.link.clear_input();
        self.link.write_all(&request)?;
        let reply = self.receive(timeout_ms)?;
        let data = decode_ack(&reply)?.into_result()?;
        Packet::from_slice(data).map_err(|()| SensorError::BadPacket)
    }

    fn command(&mut self, code: u8, params: &[u8]) -> Result<(), SensorError> {
        self.exchange(code, params, RESPONSE_TIMEOUT_MS).map(|_| ())
    }
}

impl<L: SerialLink> SensorPort for ModuleSensor<L> {
    fn set_power(&mut self, on: bool) {
        crate::drivers::gpio::write(self.power_pin, on);
        if on {
            thread::sleep(POWER_SETTLE);
        }
        debug!("Sensor: power {}", if on { "on" } else { "off" });
    }

    fn wait_ready(&mut self, timeout_ms: u32) -> Result<(), SensorError> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut byte = [0u8; 1];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(SensorError::NotReady);
            }
            let ms = (left.as_millis() as u32).max(1);
            if self.link.read(&mut byte, ms) == 1 && byte[0] == READY_BYTE {
                return Ok(());
            }
        }
    }

    fn finger_present(&self) -> bool {
        crate::drivers::gpio::read(self.touch_pin)
    }

    fn capture(&mut self) -> Result<(), SensorError> {
        self.command(op::GET_IMAGE, &[])
    }

    fn extract(&mut self, slot: u8) -> Result<(), SensorError> {
        self.command(op::GEN_CHAR, &[slot])
    }

    fn merge(&mut self) -> Result<(), SensorError> {
        self.command(op::REG_MODEL, &[])
    }

    fn store(&mut self, id: u16) -> Result<(), SensorError> {
        let [hi, lo] = id.to_be_bytes();
        self.command(op::STORE_CHAR, &[crate::app::ports::PRIMARY_SLOT, hi, lo])
    }

    fn search(&mut self, slot: u8) -> Result<u16, SensorError> {
        let [n_hi, n_lo] = LIBRARY_CAPACITY.to_be_bytes();
        let data = self.exchange(op::SEARCH, &[slot, 0, 0, n_hi, n_lo], RESPONSE_TIMEOUT_MS)?;
        match data.as_slice() {
            [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(SensorError::BadPacket),
        }
    }

    fn delete(&mut self, id: u16) -> Result<(), SensorError> {
        let [hi, lo] = id.to_be_bytes();
        self.command(op::DELETE_CHAR, &[hi, lo, 0, 1])
    }

    fn clear_library(&mut self) -> Result<(), SensorError> {
        self.command(op::CLEAR_LIB, &[])
    }

    fn read_index(&mut self) -> Result<IndexTable, SensorError> {
        let data = self.exchange(op::READ_INDEX, &[0], INDEX_TIMEOUT_MS)?;
        data.get(..INDEX_TABLE_LEN)
            .and_then(|d| IndexTable::try_from(d).ok())
            .ok_or(SensorError::BadPacket)
    }

    fn set_led(&mut self, cmd: LedCommand) -> Result<(), SensorError> {
        let base = [cmd.mode as u8, cmd.start_color, cmd.end_color, cmd.loops];
        match cmd.period {
            Some(period) => {
                let [a, b, c, d] = base;
                self.command(op::LED, &[a, b, c, d, period])
            }
            None => self.command(op::LED, &base),
        }
    }
}

// ── Host simulation ───────────────────────────────────────────

/// Scriptable sensor for host builds and tests.
///
/// With `auto_finger` set, the touch line reads high until a capture
/// succeeds, reads low once, then goes high again: one simulated
/// touch-and-lift per enrollment round.
#[derive(Debug, Default)]
pub struct SimSensor {
    pub powered: bool,
    pub finger: bool,
    pub auto_finger: bool,
    lifted: core::sync::atomic::AtomicBool,
    /// The next `n` captures fail.
    pub capture_failures: u32,
    /// Template returned by searches; `None` means no match.
    pub match_id: Option<u16>,
    pub ready: bool,
    pub library: std::collections::BTreeSet<u16>,
    filled_slots: u8,
    pub captures: u32,
    pub searches: u32,
    pub leds: std::vec::Vec<LedCommand>,
}

impl SimSensor {
    pub fn new() -> Self {
        Self {
            powered: true,
            ready: true,
            ..Self::default()
        }
    }

    /// Sensor that simulates touch-and-lift on its own.
    pub fn auto() -> Self {
        Self {
            auto_finger: true,
            ..Self::new()
        }
    }

    fn powered(&self) -> Result<(), SensorError> {
        if self.powered { Ok(()) } else { Err(SensorError::Timeout) }
    }
}

impl SensorPort for SimSensor {
    fn set_power(&mut self, on: bool) {
        self.powered = on;
        if !on {
            self.filled_slots = 0;
        }
    }

    fn wait_ready(&mut self, _timeout_ms: u32) -> Result<(), SensorError> {
        if self.powered && self.ready {
            Ok(())
        } else {
            Err(SensorError::NotReady)
        }
    }

    fn finger_present(&self) -> bool {
        if self.auto_finger {
            !self.lifted.swap(false, core::sync::atomic::Ordering::AcqRel)
        } else {
            self.finger
        }
    }

    fn capture(&mut self) -> Result<(), SensorError> {
        self.powered()?;
        self.captures += 1;
        if self.capture_failures > 0 {
            self.capture_failures -= 1;
            return Err(SensorError::Rejected(0x02));
        }
        Ok(())
    }

    fn extract(&mut self, slot: u8) -> Result<(), SensorError> {
        self.powered()?;
        if !(1..=8).contains(&slot) {
            return Err(SensorError::Rejected(0x15));
        }
        self.filled_slots |= 1 << (slot - 1);
        if self.auto_finger {
            self.lifted.store(true, core::sync::atomic::Ordering::Release);
        }
        Ok(())
    }

    fn merge(&mut self) -> Result<(), SensorError> {
        self.powered()?;
        if self.filled_slots.count_ones() < 2 {
            return Err(SensorError::Rejected(0x0A));
        }
        Ok(())
    }

    fn store(&mut self, id: u16) -> Result<(), SensorError> {
        self.powered()?;
        if id >= LIBRARY_CAPACITY {
            return Err(SensorError::Rejected(0x0B));
        }
        self.library.insert(id);
        self.filled_slots = 0;
        Ok(())
    }

    fn search(&mut self, _slot: u8) -> Result<u16, SensorError> {
        self.powered()?;
        self.searches += 1;
        self.match_id.ok_or(SensorError::NoMatch)
    }

    fn delete(&mut self, id: u16) -> Result<(), SensorError> {
        self.powered()?;
        self.library.remove(&id);
        Ok(())
    }

    fn clear_library(&mut self) -> Result<(), SensorError> {
        self.powered()?;
        self.library.clear();
        Ok(())
    }

    fn read_index(&mut self) -> Result<IndexTable, SensorError> {
        self.powered()?;
        let mut table = [0u8; INDEX_TABLE_LEN];
        for &id in &self.library {
            table[usize::from(id / 8)] |= 1 << (id % 8);
        }
        Ok(table)
    }

    fn set_led(&mut self, cmd: LedCommand) -> Result<(), SensorError> {
        self.powered()?;
        self.leds.push(cmd);
        Ok(())
    }
}

// ── Ring-light indicator ──────────────────────────────────────

/// Ring-light pattern for each device state.
pub fn led_for(indication: Indication) -> LedCommand {
    match indication {
        Indication::Pairing => LedCommand {
            mode: LedMode::Blink,
            start_color: 0x07,
            end_color: (5 << 4) | 5,
            loops: 0,
            period: Some(8),
        },
        Indication::Reconnecting => LedCommand {
            mode: LedMode::Blink,
            start_color: 0x01,
            end_color: (2 << 4) | 8,
            loops: 0,
            period: None,
        },
        Indication::Idle | Indication::Off => LedCommand {
            mode: LedMode::Off,
            start_color: 0,
            end_color: 0,
            loops: 0,
            period: None,
        },
        Indication::Bonded => LedCommand {
            mode: LedMode::Breath,
            start_color: 0x02,
            end_color: 0x02,
            loops: 2,
            period: None,
        },
        Indication::Disconnected => LedCommand {
            mode: LedMode::Blink,
            start_color: 0x04,
            end_color: (3 << 4) | 3,
            loops: 3,
            period: None,
        },
        Indication::Connected => LedCommand {
            mode: LedMode::Breath,
            start_color: 0x01,
            end_color: 0x01,
            loops: 0,
            period: None,
        },
        Indication::Subscribed => LedCommand {
            mode: LedMode::Breath,
            start_color: 0x01,
            end_color: 0x01,
            loops: 0,
            period: Some(18),
        },
    }
}

/// Applies indications to the sensor's ring light.
///
/// `show` never waits for the sensor: when another worker holds it, the
/// latest command stays pending until [`SensorIndicator::flush`] gets the
/// lock.
pub struct SensorIndicator {
    sensor: SharedSensor,
    pending: Mutex<Option<LedCommand>>,
}

impl SensorIndicator {
    pub fn new(sensor: SharedSensor) -> Self {
        Self {
            sensor,
            pending: Mutex::new(None),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Apply the pending command if the sensor is free. Returns whether
    /// nothing is left pending.
    pub fn flush(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(cmd) = *pending else {
            return true;
        };
        let mut sensor = match self.sensor.try_lock() {
            Ok(s) => s,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        *pending = None;
        if let Err(e) = sensor.set_led(cmd) {
            warn!("Indicator: LED command failed: {}", e);
        }
        true
    }
}

impl IndicatorPort for SensorIndicator {
    fn show(&self, indication: Indication) {
        debug!("Indicator: {:?}", indication);
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(led_for(indication));
        self.flush();
    }
}
