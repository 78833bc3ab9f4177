//! Command engine: executes the frames the dispatcher queued.
//!
//! One frame is processed to completion before the next is taken, so the
//! handlers below own the sensor, the label store and the update session
//! without further coordination. Every handler maps its `Err` onto the
//! command's FAILURE acknowledgement; notification-style commands send
//! nothing back.
//!
//! | Command            | Payload            | Reply                          |
//! |--------------------|--------------------|--------------------------------|
//! | `REGISTER`         | id                 | SUCCESS / FAILURE / CANCEL     |
//! | `DELETE`           | id                 | SUCCESS / FAILURE              |
//! | `SET_FINGER_NAME`  | id, name           | SUCCESS / FAILURE              |
//! | `RENAME_FINGER`    | id, name           | SUCCESS / FAILURE              |
//! | `GET_FINGER_NAMES` | -                  | count + records, or 0xFF       |
//! | `SET_SLEEP_TIME`   | u32 LE seconds     | SUCCESS / FAILURE              |
//! | `RESET_ALL`        | -                  | SUCCESS                        |
//! | `GET_INFO`         | -                  | [`DeviceInfo`]                 |
//! | `OTA_START`        | u32 LE size        | SUCCESS / FAILURE              |
//! | `OTA_CHUNK`        | compressed bytes   | SUCCESS / FAILURE              |
//! | `OTA_END`          | CRC32 hex text     | SUCCESS / FAILURE, then reboot |
//! | `SEARCH`           | -                  | SUCCESS                        |
//! | `LOCKSCREEN_STATUS`, `DEVICE_NOTIFY`, `ENABLE_SLEEP`, `CHECK_SLEEP` | | none |

use std::sync::{Arc, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::adapters::device_id::{BUILD_DATE, DeviceIdString, FIRMWARE_VERSION};
use crate::app::actions::{DeviceActions, Unpair};
use crate::app::labels::{LabelStore, default_label};
use crate::app::ports::{
    ConfigPort, FirmwareTarget, Indication, IndicatorPort, PlatformPort, ReplySink, SensorPort,
    SharedSensor,
};
use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::events::TouchTrigger;
use crate::link::Connectivity;
use crate::power::{PowerManager, SleepHold};
use crate::signals::{self, EventFlags};

use super::channels::CancelFlag;
use super::codec::{
    Command, CommandFrame, DeviceInfo, MAX_TEMPLATES, NAMES_READ_FAILED, Reply, parse_hex_u32,
    parse_label, read_u32_le, record_pages,
};
use super::ota::UpdateEngine;

/// Captures merged into one template.
pub const ENROLL_ROUNDS: u8 = 5;

/// Finger presence poll period during enrollment.
const FINGER_POLL: Duration = Duration::from_millis(100);

/// Pause after a failed enrollment capture.
const ENROLL_RETRY_PAUSE: Duration = Duration::from_millis(1_000);

/// Collaborators the engine drives.
pub struct EngineDeps {
    pub link: Arc<Connectivity>,
    pub sensor: SharedSensor,
    pub labels: LabelStore,
    pub config: Box<dyn ConfigPort + Send>,
    pub power: Arc<PowerManager>,
    pub actions: Arc<DeviceActions>,
    pub platform: Arc<dyn PlatformPort>,
    pub indicator: Arc<dyn IndicatorPort>,
    pub flags: Arc<EventFlags>,
    pub touch: &'static TouchTrigger,
    pub cancel: CancelFlag,
}

pub struct CommandEngine<T: FirmwareTarget> {
    deps: EngineDeps,
    config: DeviceConfig,
    ota: UpdateEngine<T>,
    device_id: DeviceIdString,
    sleep_vote: Option<bool>,
}

impl<T: FirmwareTarget> CommandEngine<T> {
    pub fn new(deps: EngineDeps, config: DeviceConfig, target: T, device_id: DeviceIdString) -> Self {
        Self {
            deps,
            config,
            ota: UpdateEngine::new(target),
            device_id,
            sleep_vote: None,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn ota(&self) -> &UpdateEngine<T> {
        &self.ota
    }

    /// Last CHECK_SLEEP answer from the host.
    pub fn sleep_vote(&self) -> Option<bool> {
        self.sleep_vote
    }

    fn sensor(&self) -> MutexGuard<'_, dyn SensorPort + 'static> {
        self.deps.sensor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reply(&self, kind: u8, code: Reply) {
        if let Err(e) = self.deps.link.ack(kind, code as u8) {
            warn!("Engine: reply 0x{:02X}/{:?} not sent: {}", kind, code, e);
        }
    }

    fn send(&self, kind: u8, payload: &[u8]) {
        if let Err(e) = self.deps.link.send(kind, payload) {
            warn!("Engine: payload for 0x{:02X} not sent: {}", kind, e);
        }
    }

    /// Execute one queued frame.
    pub fn handle(&mut self, frame: CommandFrame) {
        let kind = frame.kind;
        let Some(cmd) = frame.command() else {
            warn!("Engine: unknown type 0x{:02X} ignored", kind);
            return;
        };
        let payload = frame.payload.as_slice();
        if payload.len() < cmd.min_payload() {
            warn!(
                "Engine: {:?} payload too short ({} < {})",
                cmd,
                payload.len(),
                cmd.min_payload()
            );
            self.reply(kind, Reply::Failure);
            return;
        }
        debug!("Engine: {:?} ({} bytes)", cmd, payload.len());

        let outcome = match cmd {
            Command::Search => Some(Ok(())),
            Command::Register => {
                let result = self.register(payload[0]);
                let code = match result {
                    Ok(()) => Reply::Success,
                    Err(Error::Cancelled) => Reply::Cancel,
                    Err(_) => Reply::Failure,
                };
                if let Err(e) = result {
                    warn!("Engine: registration of {} ended: {}", payload[0], e);
                }
                self.reply(kind, code);
                None
            }
            Command::RegisterCancel => {
                self.deps.cancel.raise();
                Some(Ok(()))
            }
            Command::Delete => Some(self.delete(payload[0])),
            Command::SetFingerName | Command::RenameFinger => Some(self.set_label(payload)),
            Command::GetFingerNames => {
                self.send_names(kind);
                None
            }
            Command::SetSleepTime => Some(self.set_sleep_time(payload)),
            Command::ResetAll => {
                if let Err(e) = self.deps.actions.factory_reset(Unpair::Deferred) {
                    warn!("Engine: factory reset incomplete: {}", e);
                }
                self.config = DeviceConfig::default();
                Some(Ok(()))
            }
            Command::LockScreenStatus => {
                self.deps.flags.set(signals::SCREEN_LOCK);
                None
            }
            Command::DeviceNotify => {
                self.deps.link.enable_notifications();
                self.deps.flags.set(signals::SUBSCRIBED);
                self.deps.indicator.show(Indication::Subscribed);
                info!("Engine: host subscribed");
                None
            }
            Command::GetInfo => {
                if self.deps.touch.is_pending() {
                    self.deps.flags.set(signals::SUBSCRIBED);
                }
                self.send_info(kind);
                None
            }
            Command::EnableSleep => {
                let enable = payload[0] != 0;
                self.deps.power.prevent_sleep(SleepHold::Host, !enable);
                info!("Engine: host {} sleep", if enable { "allows" } else { "blocks" });
                None
            }
            Command::CheckSleep => {
                if let Some(&vote) = payload.first() {
                    self.sleep_vote = Some(vote != 0);
                }
                self.deps.flags.set(signals::SLEEP_CHECK);
                None
            }
            Command::OtaStart => Some(self.ota_start(payload)),
            Command::OtaChunk => Some(self.ota_chunk(payload)),
            Command::OtaEnd => {
                match self.ota_end(payload) {
                    Ok(()) => {
                        self.reply(kind, Reply::Success);
                        self.restart();
                    }
                    Err(e) => {
                        warn!("Engine: {:?} failed: {}", cmd, e);
                        self.reply(kind, Reply::Failure);
                    }
                }
                None
            }
            Command::PutFinger | Command::RemoveFinger => {
                debug!("Engine: {:?} is device-originated, ignored", cmd);
                None
            }
        };

        if let Some(result) = outcome {
            if let Err(e) = &result {
                warn!("Engine: {:?} failed: {}", cmd, e);
            }
            self.reply(kind, Reply::from_result(&result));
        }
    }

    // ── Enrollment ────────────────────────────────────────────

    fn register(&mut self, id: u8) -> Result<()> {
        if usize::from(id) >= MAX_TEMPLATES {
            return Err(Error::BadPayload("template id out of range"));
        }
        info!("Engine: enrolling template {}", id);
        let power = Arc::clone(&self.deps.power);
        let _hold = power.hold(SleepHold::Enroll);

        self.deps.platform.detach_touch_irq();
        self.deps.cancel.reset();
        let enrolled = self.enroll(id);
        self.deps.platform.attach_touch_irq();
        enrolled?;

        self.deps.labels.set(id, default_label(id).as_str())?;
        info!("Engine: template {} enrolled", id);
        Ok(())
    }

    fn enroll(&self, id: u8) -> Result<()> {
        let put = Command::PutFinger as u8;
        let remove = Command::RemoveFinger as u8;

        for slot in 1..=ENROLL_ROUNDS {
            loop {
                self.reply(put, Reply::Execute);
                self.wait_finger(true)?;
                let captured = {
                    let mut sensor = self.sensor();
                    sensor.capture().and_then(|()| sensor.extract(slot))
                };
                match captured {
                    Ok(()) => break,
                    Err(e) => {
                        debug!("Engine: enroll capture {} failed: {}", slot, e);
                        self.reply(put, Reply::Failure);
                        thread::sleep(ENROLL_RETRY_PAUSE);
                    }
                }
            }
            self.reply(put, Reply::Success);
            self.reply(remove, Reply::Success);
            self.wait_finger(false)?;
        }

        let mut sensor = self.sensor();
        sensor.merge()?;
        sensor.store(u16::from(id))?;
        Ok(())
    }

    /// Poll the touch line until it reads `present`, honouring cancellation.
    fn wait_finger(&self, present: bool) -> Result<()> {
        loop {
            if self.deps.cancel.is_raised() {
                info!("Engine: enrollment cancelled");
                return Err(Error::Cancelled);
            }
            if self.sensor().finger_present() == present {
                return Ok(());
            }
            thread::sleep(FINGER_POLL);
        }
    }

    // ── Library and labels ────────────────────────────────────

    fn delete(&self, id: u8) -> Result<()> {
        self.sensor().delete(u16::from(id))?;
        self.deps.labels.remove(id)?;
        info!("Engine: template {} deleted", id);
        Ok(())
    }

    fn set_label(&self, payload: &[u8]) -> Result<()> {
        let (id, label) = parse_label(payload)?;
        self.deps.labels.set(id, label.as_str())?;
        Ok(())
    }

    fn send_names(&self, kind: u8) {
        let table = self.sensor().read_index();
        let records = table
            .map_err(Error::from)
            .and_then(|t| self.deps.labels.list(&t).map_err(Error::from));
        match records {
            Ok(records) => {
                debug!("Engine: {} labelled templates", records.len());
                for page in record_pages(&records) {
                    self.send(kind, &page);
                }
            }
            Err(e) => {
                warn!("Engine: template names unavailable: {}", e);
                self.send(kind, &[NAMES_READ_FAILED]);
            }
        }
    }

    // ── Device settings ───────────────────────────────────────

    fn set_sleep_time(&mut self, payload: &[u8]) -> Result<()> {
        let secs = read_u32_le(payload)?;
        let next = DeviceConfig {
            sleep_timeout_secs: secs,
            ..self.config.clone()
        };
        self.deps.config.save(&next)?;
        self.config = next;
        self.deps.power.set_sleep_timeout(secs);
        info!("Engine: sleep timeout {} s", secs);
        Ok(())
    }

    fn send_info(&self, kind: u8) {
        let info = DeviceInfo {
            sleep_timeout_secs: self.deps.power.sleep_timeout_secs(),
            device_id: self.device_id.as_str(),
            build_date: BUILD_DATE,
            firmware_version: FIRMWARE_VERSION,
        };
        self.send(kind, &info.encode());
    }

    // ── Firmware update ───────────────────────────────────────

    fn sync_update_hold(&self) {
        self.deps
            .power
            .prevent_sleep(SleepHold::Update, self.ota.is_active());
    }

    fn ota_start(&mut self, payload: &[u8]) -> Result<()> {
        let total = read_u32_le(payload)?;
        let started = self.ota.start(total);
        self.sync_update_hold();
        started?;
        Ok(())
    }

    fn ota_chunk(&mut self, payload: &[u8]) -> Result<()> {
        let fed = self.ota.chunk(payload);
        self.sync_update_hold();
        fed?;
        Ok(())
    }

    fn ota_end(&mut self, payload: &[u8]) -> Result<()> {
        let finished = match parse_hex_u32(payload) {
            Ok(expected) => self.ota.finish(expected).map_err(Error::from),
            Err(e) => {
                self.ota.abort();
                Err(e)
            }
        };
        self.sync_update_hold();
        finished
    }

    fn restart(&self) {
        let delay = Duration::from_millis(u64::from(self.config.restart_delay_ms));
        info!("Engine: update verified, restarting in {} ms", delay.as_millis());
        thread::sleep(delay);
        self.deps.platform.restart();
    }
}
