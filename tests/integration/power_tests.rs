//! Sleep entry, wake-up and sleep prevention against the simulated board.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use fingerlock::app::ports::WakeCause;
use fingerlock::power::SleepHold;
use fingerlock::signals;

use super::mock_hw::Rig;

const TIMEOUT_MS: u64 = 10_000;

#[test]
fn idle_timeout_runs_a_full_sleep_cycle() {
    let rig = Rig::new();
    rig.clock.advance(TIMEOUT_MS);

    assert_eq!(rig.power.tick(), Some(WakeCause::Touch));

    let log = rig.platform.log();
    assert_eq!(log.sleeps, 1);
    assert_eq!((log.detaches, log.attaches), (1, 1));
    assert!(log.irq_attached);
    assert_eq!(rig.button.suspends.load(Ordering::SeqCst), 1);
    assert_eq!(rig.button.resumes.load(Ordering::SeqCst), 1);
    assert!(rig.button.active.load(Ordering::SeqCst));
    assert!(rig.sim.lock().unwrap().powered);
    assert!(!rig.power.is_sleeping());
}

#[test]
fn touch_wake_leaves_a_match_pending() {
    let rig = Rig::new();
    rig.clock.advance(TIMEOUT_MS);
    rig.power.tick();
    assert!(rig.touch.is_pending());
}

#[test]
fn button_wake_does_not_fire_touch() {
    let rig = Rig::new();
    rig.platform.set_wake_cause(WakeCause::Button);
    rig.clock.advance(TIMEOUT_MS);
    assert_eq!(rig.power.tick(), Some(WakeCause::Button));
    assert!(!rig.touch.is_pending());
}

#[test]
fn stays_awake_before_timeout() {
    let rig = Rig::new();
    rig.clock.advance(TIMEOUT_MS - 1);
    assert_eq!(rig.power.tick(), None);
    assert_eq!(rig.platform.log().sleeps, 0);
}

#[test]
fn activity_restarts_the_idle_timer() {
    let rig = Rig::new();
    rig.clock.advance(8_000);
    rig.power.note_activity();
    rig.clock.advance(8_000);
    assert_eq!(rig.power.tick(), None);
    rig.clock.advance(2_000);
    assert!(rig.power.tick().is_some());
}

#[test]
fn zero_timeout_disables_sleep() {
    let rig = Rig::new();
    rig.power.set_sleep_timeout(0);
    rig.clock.advance(24 * 3600 * 1000);
    assert_eq!(rig.power.tick(), None);
    assert_eq!(rig.platform.log().sleeps, 0);
}

#[test]
fn holds_are_independent() {
    let rig = Rig::new();
    rig.power.prevent_sleep(SleepHold::Host, true);
    {
        let _update = rig.power.hold(SleepHold::Update);
        rig.power.prevent_sleep(SleepHold::Host, false);
        assert!(rig.power.sleep_prevented());
        rig.clock.advance(TIMEOUT_MS);
        assert_eq!(rig.power.tick(), None);
    }
    assert!(!rig.power.sleep_prevented());

    // Releasing the guard counted as activity.
    assert_eq!(rig.power.tick(), None);
    rig.clock.advance(TIMEOUT_MS);
    assert!(rig.power.tick().is_some());
}

#[test]
fn pairing_mode_blocks_sleep() {
    let rig = Rig::new();
    rig.link.start_advertising().unwrap();
    assert!(rig.link.in_pairing_mode());

    rig.clock.advance(10 * TIMEOUT_MS);
    assert_eq!(rig.power.tick(), None);
    assert_eq!(rig.platform.log().sleeps, 0);
}

#[test]
fn sleep_disconnects_and_waits_for_confirmation() {
    let rig = Rig::with(
        fingerlock::config::DeviceConfig {
            disconnect_wait_ms: 5_000,
            ..super::mock_hw::fast_config()
        },
        fingerlock::adapters::sensor::SimSensor::auto(),
    );
    rig.connect();
    assert_eq!(rig.power.tick(), None);

    let link = rig.link.clone();
    let radio = rig.radio.clone();
    let confirm = thread::spawn(move || {
        let until = Instant::now() + Duration::from_secs(5);
        while radio.disconnects() == 0 && Instant::now() < until {
            thread::sleep(Duration::from_millis(1));
        }
        link.on_disconnect();
    });

    rig.clock.advance(TIMEOUT_MS);
    let started = Instant::now();
    assert!(rig.power.tick().is_some());
    confirm.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(rig.radio.disconnects(), 1);
    assert!(!rig.link.is_connected());
    assert_eq!(rig.platform.log().sleeps, 1);
}

#[test]
fn unconfirmed_disconnect_still_sleeps() {
    let rig = Rig::new();
    rig.connect();
    rig.clock.advance(TIMEOUT_MS);

    assert!(rig.power.tick().is_some());
    assert_eq!(rig.radio.disconnects(), 1);
    assert!(!rig.flags.is_set(signals::DISCONNECTED));
    assert_eq!(rig.platform.log().sleeps, 1);
}

#[test]
fn sensor_failing_to_boot_does_not_block_wake() {
    let rig = Rig::new();
    rig.sim.lock().unwrap().ready = false;
    rig.clock.advance(TIMEOUT_MS);

    assert!(rig.power.tick().is_some());
    assert!(!rig.power.is_sleeping());
    assert!(rig.platform.log().irq_attached);
}

#[test]
fn auto_advertise_resumes_after_wake() {
    let rig = Rig::new();
    rig.radio.set_bonded(1);
    rig.clock.advance(TIMEOUT_MS);
    rig.power.tick();

    rig.link.poll();
    assert!(rig.link.is_advertising());
    assert!(!rig.link.in_pairing_mode());
}

// ── Teardown and restore order ────────────────────────────────

mod ordering {
    use std::sync::{Arc, Mutex};

    use fingerlock::adapters::ble::SimRadio;
    use fingerlock::adapters::nvs::NvsAdapter;
    use fingerlock::app::ports::{
        Clock, IndexTable, LedCommand, PlatformPort, SensorPort, SharedSensor, SharedStorage,
        WakeCause, WorkerControl,
    };
    use fingerlock::error::SensorError;
    use fingerlock::events::TouchTrigger;
    use fingerlock::link::Connectivity;
    use fingerlock::power::{PowerDeps, PowerManager, SleepHold};
    use fingerlock::signals::EventFlags;

    use super::super::mock_hw::{Lights, ManualClock, fast_config};

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct Button(Journal);
    impl WorkerControl for Button {
        fn resume(&self) {
            self.0.lock().unwrap().push("button resume");
        }
        fn suspend(&self) {
            self.0.lock().unwrap().push("button suspend");
        }
    }

    struct Sensor(Journal);
    impl SensorPort for Sensor {
        fn set_power(&mut self, on: bool) {
            self.0.lock().unwrap().push(if on { "sensor on" } else { "sensor off" });
        }
        fn wait_ready(&mut self, _: u32) -> Result<(), SensorError> {
            self.0.lock().unwrap().push("sensor ready");
            Ok(())
        }
        fn finger_present(&self) -> bool {
            false
        }
        fn capture(&mut self) -> Result<(), SensorError> {
            Ok(())
        }
        fn extract(&mut self, _: u8) -> Result<(), SensorError> {
            Ok(())
        }
        fn merge(&mut self) -> Result<(), SensorError> {
            Ok(())
        }
        fn store(&mut self, _: u16) -> Result<(), SensorError> {
            Ok(())
        }
        fn search(&mut self, _: u8) -> Result<u16, SensorError> {
            Err(SensorError::NoMatch)
        }
        fn delete(&mut self, _: u16) -> Result<(), SensorError> {
            Ok(())
        }
        fn clear_library(&mut self) -> Result<(), SensorError> {
            Ok(())
        }
        fn read_index(&mut self) -> Result<IndexTable, SensorError> {
            Ok([0; 32])
        }
        fn set_led(&mut self, _: LedCommand) -> Result<(), SensorError> {
            Ok(())
        }
    }

    struct Platform(Journal);
    impl PlatformPort for Platform {
        fn attach_touch_irq(&self) {
            self.0.lock().unwrap().push("irq attach");
        }
        fn detach_touch_irq(&self) {
            self.0.lock().unwrap().push("irq detach");
        }
        fn light_sleep(&self) -> WakeCause {
            self.0.lock().unwrap().push("sleep");
            WakeCause::Button
        }
        fn restart(&self) {}
    }

    fn rig() -> (PowerManager, Journal, Arc<ManualClock>) {
        let journal: Journal = Arc::default();
        let storage: SharedStorage = Arc::new(Mutex::new(NvsAdapter::new().unwrap()));
        let flags = Arc::new(EventFlags::new());
        let link = Arc::new(Connectivity::new(
            Arc::new(SimRadio::new()),
            Arc::new(Lights::default()),
            storage,
            flags.clone(),
        ));
        let sensor: SharedSensor = Arc::new(Mutex::new(Sensor(journal.clone())));
        let clock = Arc::new(ManualClock::default());
        let power = PowerManager::new(
            PowerDeps {
                link,
                button: Arc::new(Button(journal.clone())),
                sensor,
                platform: Arc::new(Platform(journal.clone())),
                flags,
                touch: Box::leak(Box::new(TouchTrigger::new())),
                clock: clock.clone() as Arc<dyn Clock>,
            },
            &fast_config(),
        );
        (power, journal, clock)
    }

    #[test]
    fn sleep_tears_down_then_restores_in_mirror_order() {
        let (power, journal, clock) = rig();
        clock.advance(10_000);
        assert_eq!(power.tick(), Some(WakeCause::Button));

        assert_eq!(
            *journal.lock().unwrap(),
            [
                "button suspend",
                "sensor off",
                "irq detach",
                "sleep",
                "button resume",
                "sensor on",
                "sensor ready",
                "irq attach",
            ]
        );
    }

    #[test]
    fn prevented_sleep_never_suspends() {
        let (power, journal, clock) = rig();
        power.prevent_sleep(SleepHold::Update, true);
        clock.advance(60_000);
        assert_eq!(power.tick(), None);
        assert!(journal.lock().unwrap().is_empty());
    }
}
