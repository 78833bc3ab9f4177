//! Unlock sequencer and the touch-match loop that feeds it.
//!
//! ```text
//!   touch IRQ / touch wake ──▶ TouchTrigger ──▶ MatchLoop ──search──▶ sensor
//!                                                   │ match
//!                                                   ▼
//!                                UnlockSequencer::request ──slot(1)──▶ worker
//! ```
//!
//! The sequencer is single-flight: a request made while another one is
//! queued or executing is rejected with [`Error::Busy`]. Every step has a
//! bounded wait; a timeout aborts the sequence and releases the sleep hold.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, info, warn};

use crate::app::ports::{PRIMARY_SLOT, ReplySink, SharedSensor};
use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::events::TouchTrigger;
use crate::link::Connectivity;
use crate::power::{PowerManager, SleepHold};
use crate::rpc::codec::Command;
use crate::signals::{self, EventFlags};

/// Bounded waits of one unlock sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockTiming {
    pub connect_wait: Duration,
    pub subscribe_wait: Duration,
    pub lock_screen_query: Duration,
    pub wake_resend_settle: Duration,
}

impl From<&DeviceConfig> for UnlockTiming {
    fn from(c: &DeviceConfig) -> Self {
        let ms = |v: u32| Duration::from_millis(u64::from(v));
        Self {
            connect_wait: ms(c.connect_wait_ms),
            subscribe_wait: ms(c.subscribe_wait_ms),
            lock_screen_query: ms(c.lock_screen_query_ms),
            wake_resend_settle: ms(c.wake_resend_settle_ms),
        }
    }
}

pub struct UnlockSequencer {
    link: Arc<Connectivity>,
    power: Arc<PowerManager>,
    flags: Arc<EventFlags>,
    timing: UnlockTiming,
    busy: AtomicBool,
    slot: Channel<CriticalSectionRawMutex, (), 1>,
}

impl UnlockSequencer {
    pub fn new(
        link: Arc<Connectivity>,
        power: Arc<PowerManager>,
        flags: Arc<EventFlags>,
        timing: UnlockTiming,
    ) -> Self {
        Self {
            link,
            power,
            flags,
            timing,
            busy: AtomicBool::new(false),
            slot: Channel::new(),
        }
    }

    /// True from an accepted request until its sequence finished.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Queue one unlock. Never blocks.
    pub fn request(&self) -> Result<()> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Unlock: already running, request rejected");
            return Err(Error::Busy);
        }
        if self.slot.try_send(()).is_err() {
            self.busy.store(false, Ordering::Release);
            return Err(Error::Busy);
        }
        info!("Unlock: requested");
        Ok(())
    }

    /// Wait for one request and run it to completion.
    pub fn serve_next(&self) -> Result<()> {
        futures_lite::future::block_on(self.slot.receive());
        let outcome = self.execute();
        match &outcome {
            Ok(()) => info!("Unlock: sequence complete"),
            Err(e) => warn!("Unlock: sequence aborted: {}", e),
        }
        self.busy.store(false, Ordering::Release);
        outcome
    }

    /// Worker body.
    pub fn run(&self) -> ! {
        loop {
            let _ = self.serve_next();
        }
    }

    fn execute(&self) -> Result<()> {
        let _hold = self.power.hold(SleepHold::Unlock);

        if !self.link.is_connected() {
            info!("Unlock: waiting for the host to connect");
            if !self.flags.wait(signals::CONNECTED, self.timing.connect_wait) {
                return Err(Error::Timeout("connection"));
            }
        }

        self.link.send_wake_key()?;

        if self.link.notifications_enabled() {
            self.flags.clear(signals::SCREEN_LOCK);
            self.link.send(Command::LockScreenStatus as u8, &[1])?;
            if !self.flags.wait(signals::SCREEN_LOCK, self.timing.lock_screen_query) {
                warn!("Unlock: no lock-screen reply, waking the host again");
                self.link.send_wake_key()?;
                thread::sleep(self.timing.wake_resend_settle);
            }
        } else {
            info!("Unlock: waiting for the host to subscribe");
            if !self.flags.wait(signals::SUBSCRIBED, self.timing.subscribe_wait) {
                return Err(Error::Timeout("subscription"));
            }
        }

        self.link.send(Command::Search as u8, &[1])?;
        Ok(())
    }
}

// ── Touch-match loop ──────────────────────────────────────────

/// Capture attempts per touch before giving up.
pub const CAPTURE_ATTEMPTS: usize = 5;

const CAPTURE_RETRY_PAUSE: Duration = Duration::from_millis(500);

/// How long one [`MatchLoop::step`] waits for a touch in the worker loop.
const TOUCH_POLL_MS: u32 = 1_000;

pub struct MatchLoop {
    sensor: SharedSensor,
    power: Arc<PowerManager>,
    unlock: Arc<UnlockSequencer>,
    touch: &'static TouchTrigger,
    cooldown: Duration,
}

impl MatchLoop {
    pub fn new(
        sensor: SharedSensor,
        power: Arc<PowerManager>,
        unlock: Arc<UnlockSequencer>,
        touch: &'static TouchTrigger,
        config: &DeviceConfig,
    ) -> Self {
        Self {
            sensor,
            power,
            unlock,
            touch,
            cooldown: Duration::from_millis(u64::from(config.match_cooldown_ms)),
        }
    }

    /// Capture, extract and search once the image is good. Returns the
    /// matched template id.
    pub fn identify(&self) -> Option<u16> {
        let mut sensor = self.sensor.lock().unwrap_or_else(PoisonError::into_inner);
        let mut extracted = false;
        for attempt in 1..=CAPTURE_ATTEMPTS {
            match sensor.capture().and_then(|()| sensor.extract(PRIMARY_SLOT)) {
                Ok(()) => {
                    extracted = true;
                    break;
                }
                Err(e) => {
                    debug!("Match: attempt {}/{} failed: {}", attempt, CAPTURE_ATTEMPTS, e);
                    if attempt < CAPTURE_ATTEMPTS {
                        thread::sleep(CAPTURE_RETRY_PAUSE);
                    }
                }
            }
        }
        if !extracted {
            return None;
        }
        match sensor.search(PRIMARY_SLOT) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Match: search failed: {}", e);
                None
            }
        }
    }

    /// Serve one pending touch, if one arrives within `timeout_ms`.
    /// Returns whether a touch was handled.
    pub fn step(&self, timeout_ms: u32) -> bool {
        if !self.touch.wait(timeout_ms) {
            return false;
        }
        self.power.note_activity();
        info!("Match: touch, searching");
        match self.identify() {
            Some(id) => {
                info!("Match: template {} matched", id);
                if let Err(e) = self.unlock.request() {
                    warn!("Match: unlock not started: {}", e);
                }
            }
            None => info!("Match: no match"),
        }
        thread::sleep(self.cooldown);
        self.touch.clear();
        true
    }

    /// Worker body.
    pub fn run(&self) -> ! {
        self.touch.bind_current();
        loop {
            self.step(TOUCH_POLL_MS);
        }
    }
}
