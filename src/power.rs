//! Power state machine: idle tracking, sleep entry and wake-up.
//!
//! ```text
//!            any hold set                      idle ≥ timeout, no hold
//!   Active ◀──────────────▶ SleepPrevented     Active ────────────────▶ Sleeping
//!     ▲                                                                    │
//!     └──────────────────────────── wake (touch / button) ─────────────────┘
//! ```
//!
//! Sleep entry tears every hardware dependency down in a fixed order and
//! wake rebuilds them in the matching order:
//!
//! | Step | Enter                               | Wake                              |
//! |------|-------------------------------------|-----------------------------------|
//! | 1    | stop auto re-advertising            | resume the button worker          |
//! | 2    | suspend the button worker           | re-enable auto re-advertising     |
//! | 3    | sensor power off                    | sensor power on + ready wait      |
//! | 4    | detach the touch interrupt          | re-attach the touch interrupt     |
//! | 5    | disconnect, wait for confirmation   | reset idle timer, clear Sleeping  |
//! | 6    | light sleep                         | touch wake → pending match        |
//!
//! Sleep prevention is a set of independent holds so one subsystem
//! releasing its hold never cancels another's.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{info, warn};

use crate::app::ports::{Clock, PlatformPort, SharedSensor, WakeCause, WorkerControl};
use crate::config::DeviceConfig;
use crate::events::TouchTrigger;
use crate::link::Connectivity;
use crate::signals::{self, EventFlags};

/// Reasons to keep the device awake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SleepHold {
    /// Pairing button held down.
    Button = 1 << 0,
    /// The host asked to stay awake.
    Host = 1 << 1,
    /// Firmware update session open.
    Update = 1 << 2,
    /// Unlock sequence running.
    Unlock = 1 << 3,
    /// Fingerprint enrollment in progress.
    Enroll = 1 << 4,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerState {
    pub last_activity_ms: u64,
    holds: u8,
    pub sleeping: bool,
}

impl PowerState {
    pub fn sleep_prevented(&self) -> bool {
        self.holds != 0
    }
}

/// Everything sleep entry and wake reach into.
pub struct PowerDeps {
    pub link: Arc<Connectivity>,
    pub button: Arc<dyn WorkerControl>,
    pub sensor: SharedSensor,
    pub platform: Arc<dyn PlatformPort>,
    pub flags: Arc<EventFlags>,
    pub touch: &'static TouchTrigger,
    pub clock: Arc<dyn Clock>,
}

pub struct PowerManager {
    deps: PowerDeps,
    state: Mutex<PowerState>,
    sleep_timeout_secs: AtomicU32,
    disconnect_wait: Duration,
    sensor_ready_wait_ms: u32,
}

/// Holds sleep off until dropped.
pub struct SleepGuard<'a> {
    power: &'a PowerManager,
    hold: SleepHold,
}

impl Drop for SleepGuard<'_> {
    fn drop(&mut self) {
        self.power.prevent_sleep(self.hold, false);
    }
}

impl PowerManager {
    pub fn new(deps: PowerDeps, config: &DeviceConfig) -> Self {
        let now = deps.clock.now_ms();
        Self {
            deps,
            state: Mutex::new(PowerState {
                last_activity_ms: now,
                ..PowerState::default()
            }),
            sleep_timeout_secs: AtomicU32::new(config.sleep_timeout_secs),
            disconnect_wait: Duration::from_millis(u64::from(config.disconnect_wait_ms)),
            sensor_ready_wait_ms: config.sensor_ready_wait_ms,
        }
    }

    fn state(&self) -> MutexGuard<'_, PowerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PowerState {
        *self.state()
    }

    pub fn is_sleeping(&self) -> bool {
        self.state().sleeping
    }

    pub fn sleep_prevented(&self) -> bool {
        self.state().sleep_prevented()
    }

    /// Restart the idle timer.
    pub fn note_activity(&self) {
        let now = self.deps.clock.now_ms();
        self.state().last_activity_ms = now;
    }

    /// Set or release one hold. Either way counts as activity.
    pub fn prevent_sleep(&self, hold: SleepHold, prevent: bool) {
        let now = self.deps.clock.now_ms();
        let mut s = self.state();
        if prevent {
            s.holds |= hold as u8;
        } else {
            s.holds &= !(hold as u8);
        }
        s.last_activity_ms = now;
    }

    /// Hold sleep off for the guard's lifetime.
    pub fn hold(&self, hold: SleepHold) -> SleepGuard<'_> {
        self.prevent_sleep(hold, true);
        SleepGuard { power: self, hold }
    }

    /// New idle timeout in seconds; 0 disables auto-sleep.
    pub fn set_sleep_timeout(&self, secs: u32) {
        self.sleep_timeout_secs.store(secs, Ordering::Release);
        self.note_activity();
    }

    pub fn sleep_timeout_secs(&self) -> u32 {
        self.sleep_timeout_secs.load(Ordering::Acquire)
    }

    /// Scheduler step. Sleeps when idle long enough; returns the wake
    /// cause when a sleep cycle ran.
    pub fn tick(&self) -> Option<WakeCause> {
        if self.deps.link.in_pairing_mode() {
            self.note_activity();
            return None;
        }
        let timeout_ms = match self.sleep_timeout_secs() {
            0 => return None,
            secs => u64::from(secs) * 1000,
        };
        let now = self.deps.clock.now_ms();
        {
            let mut s = self.state();
            if s.sleep_prevented() || s.sleeping {
                return None;
            }
            if now.saturating_sub(s.last_activity_ms) < timeout_ms {
                return None;
            }
            s.sleeping = true;
        }
        info!("Power: idle for {} s, entering sleep", timeout_ms / 1000);
        self.sleep_cycle()
    }

    fn sleep_cycle(&self) -> Option<WakeCause> {
        self.enter();
        let cause = if self.sleep_prevented() {
            warn!("Power: hold taken during sleep entry, staying awake");
            None
        } else {
            Some(self.deps.platform.light_sleep())
        };
        self.wake(cause);
        cause
    }

    fn enter(&self) {
        let d = &self.deps;
        d.link.set_auto_advertise(false);
        d.button.suspend();
        d.sensor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_power(false);
        d.platform.detach_touch_irq();

        if d.link.is_connected() {
            d.flags.clear(signals::DISCONNECTED);
            match d.link.disconnect() {
                Ok(()) => {
                    if d.flags.wait(signals::DISCONNECTED, self.disconnect_wait) {
                        info!("Power: link closed");
                    } else {
                        warn!("Power: disconnect not confirmed, sleeping anyway");
                    }
                }
                Err(e) => warn!("Power: disconnect failed: {}", e),
            }
        }
    }

    fn wake(&self, cause: Option<WakeCause>) {
        let d = &self.deps;
        if let Some(cause) = cause {
            info!("Power: woke by {:?}", cause);
        }
        d.button.resume();
        d.link.set_auto_advertise(true);
        {
            let mut sensor = d.sensor.lock().unwrap_or_else(PoisonError::into_inner);
            sensor.set_power(true);
            if let Err(e) = sensor.wait_ready(self.sensor_ready_wait_ms) {
                warn!("Power: sensor not ready after wake: {}", e);
            }
        }
        d.platform.attach_touch_irq();

        let now = d.clock.now_ms();
        {
            let mut s = self.state();
            s.last_activity_ms = now;
            s.sleeping = false;
        }
        if cause == Some(WakeCause::Touch) {
            d.touch.fire();
        }
    }
}
