//! Mock hardware rig for integration tests.
//!
//! Wires the real orchestration objects (link, power, actions) to the
//! host simulations and records every port call the simulations do not
//! already record, so tests can assert on the full interaction history.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use fingerlock::adapters::ble::SimRadio;
use fingerlock::adapters::device_id::DeviceIdString;
use fingerlock::adapters::nvs::{NvsAdapter, NvsConfig};
use fingerlock::adapters::ota_partition::SimPartition;
use fingerlock::adapters::platform::SimPlatform;
use fingerlock::adapters::sensor::SimSensor;
use fingerlock::app::actions::DeviceActions;
use fingerlock::app::labels::LabelStore;
use fingerlock::app::ports::{
    Address, Clock, Indication, IndicatorPort, SharedSensor, SharedStorage, WorkerControl,
};
use fingerlock::config::DeviceConfig;
use fingerlock::events::TouchTrigger;
use fingerlock::link::Connectivity;
use fingerlock::power::{PowerDeps, PowerManager};
use fingerlock::rpc::channels::CancelFlag;
use fingerlock::rpc::engine::{CommandEngine, EngineDeps};
use fingerlock::signals::EventFlags;

pub const PEER: Address = [0x10, 0x20, 0x30, 0x40, 0x50, 0xC6];

// ── Clock ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct ManualClock(AtomicU64);

#[allow(dead_code)]
impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Indicator ─────────────────────────────────────────────────

#[derive(Default)]
pub struct Lights(Mutex<Vec<Indication>>);

#[allow(dead_code)]
impl Lights {
    pub fn shown(&self) -> Vec<Indication> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Indication> {
        self.0.lock().unwrap().last().copied()
    }
}

impl IndicatorPort for Lights {
    fn show(&self, indication: Indication) {
        self.0.lock().unwrap().push(indication);
    }
}

// ── Button worker control ─────────────────────────────────────

pub struct MockButton {
    pub active: AtomicBool,
    pub suspends: AtomicU32,
    pub resumes: AtomicU32,
}

impl Default for MockButton {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(true),
            suspends: AtomicU32::new(0),
            resumes: AtomicU32::new(0),
        }
    }
}

impl WorkerControl for MockButton {
    fn resume(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn suspend(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.suspends.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Rig ───────────────────────────────────────────────────────

/// Shortest timings the persisted-config validation still accepts.
pub fn fast_config() -> DeviceConfig {
    DeviceConfig {
        disconnect_wait_ms: 100,
        sensor_ready_wait_ms: 50,
        connect_wait_ms: 500,
        subscribe_wait_ms: 500,
        lock_screen_query_ms: 50,
        wake_resend_settle_ms: 10,
        match_cooldown_ms: 10,
        restart_delay_ms: 100,
        ..DeviceConfig::default()
    }
}

#[allow(dead_code)]
pub struct Rig {
    pub config: DeviceConfig,
    pub radio: Arc<SimRadio>,
    pub sim: Arc<Mutex<SimSensor>>,
    pub sensor: SharedSensor,
    pub platform: Arc<SimPlatform>,
    pub storage: SharedStorage,
    pub lights: Arc<Lights>,
    pub flags: Arc<EventFlags>,
    pub clock: Arc<ManualClock>,
    pub button: Arc<MockButton>,
    pub touch: &'static TouchTrigger,
    pub cancel: CancelFlag,
    pub link: Arc<Connectivity>,
    pub power: Arc<PowerManager>,
    pub actions: Arc<DeviceActions>,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with(fast_config(), SimSensor::auto())
    }

    pub fn with(config: DeviceConfig, sensor: SimSensor) -> Self {
        let radio = Arc::new(SimRadio::new());
        let sim = Arc::new(Mutex::new(sensor));
        let shared: SharedSensor = sim.clone();
        let platform = Arc::new(SimPlatform::new());
        let storage: SharedStorage = Arc::new(Mutex::new(NvsAdapter::new().unwrap()));
        let lights = Arc::new(Lights::default());
        let flags = Arc::new(EventFlags::new());
        let clock = Arc::new(ManualClock::default());
        let button = Arc::new(MockButton::default());
        let touch: &'static TouchTrigger = Box::leak(Box::new(TouchTrigger::new()));

        let link = Arc::new(Connectivity::new(
            radio.clone(),
            lights.clone(),
            storage.clone(),
            flags.clone(),
        ));
        let power = Arc::new(PowerManager::new(
            PowerDeps {
                link: link.clone(),
                button: button.clone(),
                sensor: shared.clone(),
                platform: platform.clone(),
                flags: flags.clone(),
                touch,
                clock: clock.clone(),
            },
            &config,
        ));
        let actions = Arc::new(DeviceActions::new(
            link.clone(),
            power.clone(),
            shared.clone(),
            storage.clone(),
            lights.clone(),
        ));

        Self {
            config,
            radio,
            sim,
            sensor: shared,
            platform,
            storage,
            lights,
            flags,
            clock,
            button,
            touch,
            cancel: CancelFlag::new(),
            link,
            power,
            actions,
        }
    }

    /// Advertise, then accept a bonded host.
    pub fn connect(&self) {
        self.link.start_advertising().unwrap();
        self.radio.set_bonded(1);
        self.link.on_connect(PEER);
        self.link.on_bonded();
    }

    pub fn engine(&self) -> CommandEngine<SimPartition> {
        let deps = EngineDeps {
            link: self.link.clone(),
            sensor: self.sensor.clone(),
            labels: LabelStore::new(self.storage.clone()),
            config: Box::new(NvsConfig::new(self.storage.clone())),
            power: self.power.clone(),
            actions: self.actions.clone(),
            platform: self.platform.clone(),
            indicator: self.lights.clone(),
            flags: self.flags.clone(),
            touch: self.touch,
            cancel: self.cancel.clone(),
        };
        let mut id = DeviceIdString::new();
        id.push_str("FL-EFCAFE").unwrap();
        CommandEngine::new(deps, self.config.clone(), SimPartition::new(), id)
    }

    /// Frames notified since the last call, split into `(type, payload)`.
    pub fn sent(&self) -> Vec<(u8, Vec<u8>)> {
        self.radio
            .take_notified()
            .into_iter()
            .map(|f| {
                let len = usize::from(u16::from_be_bytes([f[1], f[2]]));
                assert_eq!(f.len(), 3 + len, "frame length header");
                (f[0], f[3..].to_vec())
            })
            .collect()
    }
}
