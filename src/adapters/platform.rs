//! SoC services behind [`PlatformPort`]: touch interrupt routing, light
//! sleep and reboot.

use crate::app::ports::{PlatformPort, WakeCause};

#[cfg(target_os = "espidf")]
pub struct EspPlatform;

#[cfg(target_os = "espidf")]
impl PlatformPort for EspPlatform {
    fn attach_touch_irq(&self) {
        crate::drivers::gpio::set_irq_enabled(crate::pins::SENSOR_TOUCH_GPIO, true);
    }

    fn detach_touch_irq(&self) {
        crate::drivers::gpio::set_irq_enabled(crate::pins::SENSOR_TOUCH_GPIO, false);
    }

    fn light_sleep(&self) -> WakeCause {
        log::info!("Platform: light sleep");
        if crate::drivers::gpio::light_sleep_on_lines() {
            WakeCause::Button
        } else {
            WakeCause::Touch
        }
    }

    fn restart(&self) {
        log::warn!("Platform: restarting");
        // SAFETY: esp_restart does not return.
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
}

// ── Host simulation ───────────────────────────────────────────

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformLog {
    pub irq_attached: bool,
    pub attaches: u32,
    pub detaches: u32,
    pub sleeps: u32,
    pub restarts: u32,
}

/// Records every call; sleep returns immediately with a scripted cause.
pub struct SimPlatform {
    log: Mutex<PlatformLog>,
    wake: Mutex<WakeCause>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self {
            log: Mutex::new(PlatformLog {
                irq_attached: true,
                ..PlatformLog::default()
            }),
            wake: Mutex::new(WakeCause::Touch),
        }
    }
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_wake_cause(&self, cause: WakeCause) {
        *self.wake.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = cause;
    }

    pub fn log(&self) -> PlatformLog {
        *self.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, f: impl FnOnce(&mut PlatformLog)) {
        f(&mut self.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
    }
}

impl PlatformPort for SimPlatform {
    fn attach_touch_irq(&self) {
        self.record(|l| {
            l.irq_attached = true;
            l.attaches += 1;
        });
    }

    fn detach_touch_irq(&self) {
        self.record(|l| {
            l.irq_attached = false;
            l.detaches += 1;
        });
    }

    fn light_sleep(&self) -> WakeCause {
        self.record(|l| l.sleeps += 1);
        *self.wake.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn restart(&self) {
        log::info!("Platform(sim): restart requested");
        self.record(|l| l.restarts += 1);
    }
}
