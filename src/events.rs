//! Interrupt-to-worker signal bridge.
//!
//! GPIO interrupts run in a restricted context: no locks, no allocation,
//! no logging. Each handler therefore does exactly two things, set an
//! atomic flag and poke the owning worker without blocking.
//!
//! ```text
//! ┌──────────────┐  raise()   ┌────────────┐  wait(ms)  ┌───────────────┐
//! │ button ISR   │───────────▶│ WakeSignal │───────────▶│ button worker │
//! └──────────────┘            └────────────┘            └───────────────┘
//! ┌──────────────┐  fire()    ┌──────────────┐  wait()  ┌───────────────┐
//! │ touch ISR    │───────────▶│ TouchTrigger │─────────▶│ match loop    │
//! │ wake-on-touch│───────────▶│  (pending)   │          └───────────────┘
//! └──────────────┘            └──────────────┘
//! ```
//!
//! Notifications coalesce: several edges before the worker runs collapse
//! into one wake-up. Consumers re-read line levels, so nothing is lost.

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_os = "espidf")]
use core::sync::atomic::AtomicPtr;

#[cfg(not(target_os = "espidf"))]
use std::sync::{Condvar, Mutex, PoisonError};

/// Edge notification from the pairing button line.
pub static BUTTON_EDGE: WakeSignal = WakeSignal::new();

/// Pending match attempt raised by the touch line (or by waking from it).
pub static TOUCH: TouchTrigger = TouchTrigger::new();

// ── WakeSignal ────────────────────────────────────────────────

/// Single-consumer wake-up with a coalescing pending flag.
///
/// On the device the consumer is a FreeRTOS task woken by a direct task
/// notification. On the host a condition variable stands in.
pub struct WakeSignal {
    pending: AtomicBool,
    #[cfg(target_os = "espidf")]
    task: AtomicPtr<core::ffi::c_void>,
    #[cfg(not(target_os = "espidf"))]
    lock: Mutex<()>,
    #[cfg(not(target_os = "espidf"))]
    cv: Condvar,
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignal {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            #[cfg(target_os = "espidf")]
            task: AtomicPtr::new(core::ptr::null_mut()),
            #[cfg(not(target_os = "espidf"))]
            lock: Mutex::new(()),
            #[cfg(not(target_os = "espidf"))]
            cv: Condvar::new(),
        }
    }

    /// Register the calling task as the consumer. Call once from the worker.
    #[cfg(target_os = "espidf")]
    pub fn bind_current(&self) {
        if let Some(handle) = esp_idf_hal::task::current() {
            self.task.store(handle.cast(), Ordering::Release);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn bind_current(&self) {}

    /// Mark an event and wake the consumer. Safe from interrupt context.
    #[cfg(target_os = "espidf")]
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
        let task = self.task.load(Ordering::Acquire);
        if task.is_null() {
            return;
        }
        // SAFETY: the handle was obtained from `task::current()` by the
        // consumer and worker tasks are never deleted. A full notification
        // slot just coalesces with the pending flag.
        unsafe {
            esp_idf_hal::task::notify_and_yield(task.cast(), core::num::NonZeroU32::MIN);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cv.notify_all();
    }

    /// Block up to `timeout_ms` for an event. Returns (and clears) the
    /// pending flag, so `false` means the timeout elapsed with no event.
    #[cfg(target_os = "espidf")]
    pub fn wait(&self, timeout_ms: u32) -> bool {
        if self.pending.swap(false, Ordering::AcqRel) {
            return true;
        }
        let _ = esp_idf_hal::task::wait_notification(ms_to_ticks(timeout_ms));
        self.pending.swap(false, Ordering::AcqRel)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn wait(&self, timeout_ms: u32) -> bool {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.pending.swap(false, Ordering::AcqRel) {
            return true;
        }
        let _guard = self
            .cv
            .wait_timeout_while(
                guard,
                std::time::Duration::from_millis(u64::from(timeout_ms)),
                |()| !self.pending.load(Ordering::Acquire),
            )
            .map(|(g, _)| g)
            .unwrap_or_else(|e| e.into_inner().0);
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Drop any event that arrived while nobody cared.
    pub fn reset(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

#[cfg(target_os = "espidf")]
fn ms_to_ticks(ms: u32) -> u32 {
    (u64::from(ms) * u64::from(esp_idf_svc::sys::configTICK_RATE_HZ) / 1000) as u32
}

// ── TouchTrigger ──────────────────────────────────────────────

/// "A finger touched the sensor, a match attempt is owed."
///
/// Unlike [`WakeSignal`] the pending flag is sticky: it stays set while
/// the attempt runs (command handlers consult it) and is cleared by the
/// match loop once the attempt and its cool-down are over.
pub struct TouchTrigger {
    pending: AtomicBool,
    wake: WakeSignal,
}

impl Default for TouchTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl TouchTrigger {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            wake: WakeSignal::new(),
        }
    }

    /// Mark an attempt pending. Safe from interrupt context.
    pub fn fire(&self) {
        self.pending.store(true, Ordering::Release);
        self.wake.raise();
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Register the match loop as the consumer.
    pub fn bind_current(&self) {
        self.wake.bind_current();
    }

    /// Block up to `timeout_ms`; true when an attempt is pending.
    pub fn wait(&self, timeout_ms: u32) -> bool {
        if self.is_pending() {
            return true;
        }
        self.wake.wait(timeout_ms);
        self.is_pending()
    }
}

// ── ISR entry points ──────────────────────────────────────────

/// Button line edge. Register on the button GPIO (any edge).
pub fn button_edge_from_isr() {
    BUTTON_EDGE.raise();
}

/// Touch line rising edge. Register on the touch GPIO.
pub fn touch_from_isr() {
    TOUCH.fire();
}
