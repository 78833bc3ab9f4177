//! Device configuration parameters
//!
//! All tunable timings for the FingerLock accessory.
//! Values persist in NVS as a postcard blob and can be changed over the link
//! (currently only the sleep timeout is exposed as a command).

use serde::{Deserialize, Serialize};

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    // --- Power ---
    /// Idle time before light sleep (seconds). 0 disables auto-sleep.
    pub sleep_timeout_secs: u32,
    /// Max wait for the disconnect confirmation before sleeping anyway (ms)
    pub disconnect_wait_ms: u32,
    /// Max wait for the sensor ready byte after power-up (ms)
    pub sensor_ready_wait_ms: u32,

    // --- Unlock ---
    /// Max wait for the host to connect after a match (ms)
    pub connect_wait_ms: u32,
    /// Max wait for the host to subscribe to notifications (ms)
    pub subscribe_wait_ms: u32,
    /// Max wait for the host's lock-screen reply (ms)
    pub lock_screen_query_ms: u32,
    /// Pause after re-sending the wake key when the host stays silent (ms)
    pub wake_resend_settle_ms: u32,
    /// Cool-down after a match attempt before the next one is accepted (ms)
    pub match_cooldown_ms: u32,

    // --- Update ---
    /// Delay between the final OTA acknowledgement and the restart (ms)
    pub restart_delay_ms: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            // Power
            sleep_timeout_secs: 10,
            disconnect_wait_ms: 10_000,
            sensor_ready_wait_ms: 500,

            // Unlock
            connect_wait_ms: 10_000,
            subscribe_wait_ms: 10_000,
            lock_screen_query_ms: 500,
            wake_resend_settle_ms: 1_000,
            match_cooldown_ms: 1_000,

            // Update
            restart_delay_ms: 1_000,
        }
    }
}

impl DeviceConfig {
    /// Idle timeout in milliseconds, `None` when auto-sleep is disabled.
    pub fn sleep_timeout_ms(&self) -> Option<u64> {
        match self.sleep_timeout_secs {
            0 => None,
            secs => Some(u64::from(secs) * 1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = DeviceConfig::default();
        assert_eq!(c.sleep_timeout_secs, 10);
        assert!(c.lock_screen_query_ms < c.subscribe_wait_ms);
        assert!(c.sensor_ready_wait_ms > 0);
        assert!(c.restart_delay_ms > 0);
    }

    #[test]
    fn zero_timeout_disables_sleep() {
        let c = DeviceConfig {
            sleep_timeout_secs: 0,
            ..DeviceConfig::default()
        };
        assert_eq!(c.sleep_timeout_ms(), None);
        assert_eq!(DeviceConfig::default().sleep_timeout_ms(), Some(10_000));
    }

    #[test]
    fn postcard_roundtrip() {
        let c = DeviceConfig {
            sleep_timeout_secs: 300,
            ..DeviceConfig::default()
        };
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: DeviceConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c, c2);
    }
}
