//! FingerLock firmware entry point.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                       Adapters (outer ring)                       │
//! │  ModuleSensor   BleRadio    NvsAdapter   EspPlatform  EspPartition│
//! │  (Sensor)       (Radio)     (Storage)    (Platform)   (Firmware)  │
//! │  ─────────────────────── Port Trait Boundary ──────────────────── │
//! │   Connectivity · PowerManager · UnlockSequencer · DeviceActions   │
//! │                                                                   │
//! │  workers: cmd (CommandEngine) · button · unlock · match           │
//! │  main task: scheduler loop (link poll, power tick, watchdog)      │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

#![deny(unused_must_use)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{info, warn};

use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::uart::{UartDriver, config::Config as UartConfig};
use esp_idf_hal::units::Hertz;

use fingerlock::adapters::ble::{self, BleRadio, LinkEvents};
use fingerlock::adapters::device_id;
use fingerlock::adapters::nvs::{NvsAdapter, NvsConfig};
use fingerlock::adapters::ota_partition::EspPartition;
use fingerlock::adapters::platform::EspPlatform;
use fingerlock::adapters::sensor::{ModuleSensor, SensorIndicator, UartLink};
use fingerlock::adapters::time::MonotonicClock;
use fingerlock::app::actions::DeviceActions;
use fingerlock::app::labels::LabelStore;
use fingerlock::app::ports::{
    Clock, ConfigPort, IndicatorPort, PlatformPort, SensorPort, SharedSensor, SharedStorage,
};
use fingerlock::config::DeviceConfig;
use fingerlock::drivers::button::{ButtonControl, ButtonWorker};
use fingerlock::drivers::gpio::{self, InputLine};
use fingerlock::drivers::task_pin::{Core, spawn_on_core};
use fingerlock::drivers::watchdog::{self, Watchdog};
use fingerlock::events;
use fingerlock::link::Connectivity;
use fingerlock::pins;
use fingerlock::power::{PowerDeps, PowerManager};
use fingerlock::rpc::channels::{self, COMMANDS, CancelFlag, Dispatcher};
use fingerlock::rpc::engine::{CommandEngine, EngineDeps};
use fingerlock::rpc::ota;
use fingerlock::signals::EventFlags;
use fingerlock::unlock::{MatchLoop, UnlockSequencer, UnlockTiming};

const TICK: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("FingerLock v{} ({})", device_id::FIRMWARE_VERSION, device_id::BUILD_DATE);
    ota::check_rollback();

    gpio::init_lines()?;
    gpio::init_isr_service()?;

    // ── 2. Storage and config ─────────────────────────────────
    let storage: SharedStorage = Arc::new(Mutex::new(NvsAdapter::new()?));
    let config_store = NvsConfig::new(storage.clone());
    let config = config_store.load().unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        DeviceConfig::default()
    });

    // ── 3. Sensor bring-up ────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let uart = UartDriver::new(
        peripherals.uart1,
        // SAFETY: these lines are used by nothing but the sensor UART.
        unsafe { AnyIOPin::new(pins::SENSOR_TX_GPIO) },
        unsafe { AnyIOPin::new(pins::SENSOR_RX_GPIO) },
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(Hertz(pins::SENSOR_BAUD)),
    )?;
    let mut module = ModuleSensor::new(
        UartLink::new(uart),
        pins::SENSOR_POWER_GPIO,
        pins::SENSOR_TOUCH_GPIO,
    );
    module.set_power(true);
    match module.wait_ready(config.sensor_ready_wait_ms) {
        Ok(()) => info!("Sensor: ready"),
        Err(e) => warn!("Sensor: {} at boot, continuing", e),
    }
    let sensor: SharedSensor = Arc::new(Mutex::new(module));
    let indicator = Arc::new(SensorIndicator::new(sensor.clone()));

    // ── 4. Link ───────────────────────────────────────────────
    let mac = device_id::read_mac();
    let dev_id = device_id::device_id(&mac);
    let name = device_id::device_name(&mac);
    info!("Device ID: {} (name: {})", dev_id, name);

    let flags = Arc::new(EventFlags::new());
    let radio = Arc::new(BleRadio::new(&name).map_err(|e| anyhow!("radio init: {}", e))?);
    let link = Arc::new(Connectivity::new(
        radio,
        indicator.clone() as Arc<dyn IndicatorPort>,
        storage.clone(),
        flags.clone(),
    ));

    let cancel = CancelFlag::new();
    let dispatcher = Dispatcher::new(&COMMANDS, cancel.clone(), link.clone());
    ble::install_events(LinkEvents::new(link.clone(), dispatcher));

    // ── 5. Orchestration ──────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let platform: Arc<dyn PlatformPort> = Arc::new(EspPlatform);
    let button = Arc::new(ButtonControl::new(pins::BUTTON_GPIO, &events::BUTTON_EDGE));

    let power = Arc::new(PowerManager::new(
        PowerDeps {
            link: link.clone(),
            button: button.clone(),
            sensor: sensor.clone(),
            platform: platform.clone(),
            flags: flags.clone(),
            touch: &events::TOUCH,
            clock: clock.clone(),
        },
        &config,
    ));
    let actions = Arc::new(DeviceActions::new(
        link.clone(),
        power.clone(),
        sensor.clone(),
        storage.clone(),
        indicator.clone(),
    ));
    let unlock = Arc::new(UnlockSequencer::new(
        link.clone(),
        power.clone(),
        flags.clone(),
        UnlockTiming::from(&config),
    ));
    let matcher = MatchLoop::new(sensor.clone(), power.clone(), unlock.clone(), &events::TOUCH, &config);

    let deps = EngineDeps {
        link: link.clone(),
        sensor: sensor.clone(),
        labels: LabelStore::new(storage.clone()),
        config: Box::new(config_store),
        power: power.clone(),
        actions: actions.clone(),
        platform,
        indicator: indicator.clone(),
        flags,
        touch: &events::TOUCH,
        cancel,
    };
    let engine_config = config.clone();

    // ── 6. Workers ────────────────────────────────────────────
    spawn_on_core(Core::Any, 2, 8, "cmd\0", move || {
        let mut engine = CommandEngine::new(deps, engine_config, EspPartition::new(), dev_id);
        channels::run_worker(&COMMANDS, move |frame| engine.handle(frame))
    })?;

    let button_clock = clock.clone();
    spawn_on_core(Core::Zero, 5, 3, "button\0", move || {
        ButtonWorker::new(InputLine(pins::BUTTON_GPIO), button, move |event| {
            actions.on_button(event)
        })
        .run(move || button_clock.now_ms() as u32)
    })?;

    let unlock_worker = unlock.clone();
    spawn_on_core(Core::Any, 1, 4, "unlock\0", move || unlock_worker.run())?;
    spawn_on_core(Core::Any, 1, 4, "match\0", move || matcher.run())?;

    if let Err(e) = link.start_advertising() {
        warn!("Link: initial advertising failed: {}", e);
    }

    // ── 7. Scheduler loop ─────────────────────────────────────
    let watchdog = Watchdog::new(watchdog::DEFAULT_TIMEOUT_MS);
    info!("System ready");
    loop {
        link.poll();
        if let Some(cause) = power.tick() {
            info!("Scheduler: resumed after {:?} wake", cause);
        }
        indicator.flush();
        watchdog.feed();
        thread::sleep(TICK);
    }
}
