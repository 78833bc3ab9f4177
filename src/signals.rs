//! Sticky named signals shared between workers.
//!
//! A small event-bit group: any worker may set or clear a bit, and any
//! worker may block on a bit with a timeout. A bit set while nobody is
//! waiting stays set, so a waiter that arrives late still observes it.
//! A successful [`EventFlags::wait`] consumes the bits it reports.
//!
//! | Bit            | Set by                         | Waited on by          |
//! |----------------|--------------------------------|-----------------------|
//! | `CONNECTED`    | link connect callback          | unlock sequencer      |
//! | `DISCONNECTED` | link disconnect callback       | power (sleep entry)   |
//! | `SUBSCRIBED`   | DEVICE_NOTIFY / GET_INFO       | unlock sequencer      |
//! | `SCREEN_LOCK`  | LOCKSCREEN_STATUS reply        | unlock sequencer      |
//! | `SLEEP_CHECK`  | CHECK_SLEEP reply              | sleep-vote readers    |

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A host connected.
pub const CONNECTED: u32 = 1 << 0;
/// The link dropped while sleep entry was waiting for it.
pub const DISCONNECTED: u32 = 1 << 1;
/// The host subscribed to notifications.
pub const SUBSCRIBED: u32 = 1 << 2;
/// The host answered the lock-screen query.
pub const SCREEN_LOCK: u32 = 1 << 3;
/// The host answered the sleep check.
pub const SLEEP_CHECK: u32 = 1 << 4;

/// Group of independently settable binary signals.
pub struct EventFlags {
    bits: Mutex<u32>,
    changed: Condvar,
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFlags {
    pub const fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// Set `mask` and wake every waiter.
    pub fn set(&self, mask: u32) {
        let mut bits = self.bits.lock().unwrap_or_else(PoisonError::into_inner);
        *bits |= mask;
        self.changed.notify_all();
    }

    /// Clear `mask` without waking anyone.
    pub fn clear(&self, mask: u32) {
        let mut bits = self.bits.lock().unwrap_or_else(PoisonError::into_inner);
        *bits &= !mask;
    }

    /// True if any bit of `mask` is currently set.
    pub fn is_set(&self, mask: u32) -> bool {
        *self.bits.lock().unwrap_or_else(PoisonError::into_inner) & mask != 0
    }

    /// Block until any bit of `mask` is set or `timeout` elapses.
    ///
    /// Returns immediately when a bit is already set. On success the
    /// bits of `mask` are cleared; on timeout nothing changes.
    pub fn wait(&self, mask: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut bits = self.bits.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *bits & mask != 0 {
                *bits &= !mask;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            bits = self
                .changed
                .wait_timeout(bits, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_before_wait_is_observed() {
        let flags = EventFlags::new();
        flags.set(CONNECTED);
        assert!(flags.wait(CONNECTED, Duration::from_millis(0)));
    }

    #[test]
    fn wait_consumes_bit() {
        let flags = EventFlags::new();
        flags.set(SUBSCRIBED);
        assert!(flags.wait(SUBSCRIBED, Duration::from_millis(10)));
        assert!(!flags.is_set(SUBSCRIBED));
        assert!(!flags.wait(SUBSCRIBED, Duration::from_millis(10)));
    }

    #[test]
    fn wait_times_out_without_side_effects() {
        let flags = EventFlags::new();
        flags.set(SCREEN_LOCK);
        let start = Instant::now();
        assert!(!flags.wait(CONNECTED, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(flags.is_set(SCREEN_LOCK));
    }

    #[test]
    fn clear_removes_only_masked_bits() {
        let flags = EventFlags::new();
        flags.set(CONNECTED | SUBSCRIBED);
        flags.clear(SUBSCRIBED);
        assert!(flags.is_set(CONNECTED));
        assert!(!flags.is_set(SUBSCRIBED));
    }

    #[test]
    fn waiter_wakes_on_set_from_other_thread() {
        let flags = Arc::new(EventFlags::new());
        let setter = Arc::clone(&flags);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set(DISCONNECTED);
        });
        assert!(flags.wait(DISCONNECTED, Duration::from_secs(2)));
        handle.join().unwrap();
    }
}
