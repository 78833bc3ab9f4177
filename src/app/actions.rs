//! Device-level actions shared by the button gestures and host commands.

use std::sync::{Arc, PoisonError};

use log::{info, warn};

use crate::adapters::nvs::NAMESPACE;
use crate::app::ports::{Indication, IndicatorPort, SharedSensor, SharedStorage};
use crate::config::DeviceConfig;
use crate::drivers::button::ButtonEvent;
use crate::error::{Error, Result};
use crate::link::Connectivity;
use crate::power::{PowerManager, SleepHold};

/// When the bond teardown of a factory reset runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unpair {
    /// Right away, from a worker that owns no pending reply.
    Now,
    /// On the next scheduler poll, so an acknowledgement can leave first.
    Deferred,
}

pub struct DeviceActions {
    link: Arc<Connectivity>,
    power: Arc<PowerManager>,
    sensor: SharedSensor,
    storage: SharedStorage,
    indicator: Arc<dyn IndicatorPort>,
}

impl DeviceActions {
    pub fn new(
        link: Arc<Connectivity>,
        power: Arc<PowerManager>,
        sensor: SharedSensor,
        storage: SharedStorage,
        indicator: Arc<dyn IndicatorPort>,
    ) -> Self {
        Self {
            link,
            power,
            sensor,
            storage,
            indicator,
        }
    }

    /// Wipe persisted state, bonds and the template library.
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned.
    pub fn factory_reset(&self, unpair: Unpair) -> Result<()> {
        info!("Actions: factory reset");
        let mut first_err: Option<Error> = None;

        let erased = self
            .storage
            .lock()
            .map_err(|_| Error::Storage(crate::app::ports::StorageError::IoError))
            .and_then(|mut s| s.erase_namespace(NAMESPACE).map_err(Error::from));
        if let Err(e) = erased {
            warn!("Actions: storage erase failed: {}", e);
            first_err.get_or_insert(e);
        }

        let cleared = self
            .sensor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear_library();
        if let Err(e) = cleared {
            warn!("Actions: template library clear failed: {}", e);
            first_err.get_or_insert(e.into());
        }

        self.power
            .set_sleep_timeout(DeviceConfig::default().sleep_timeout_secs);

        match unpair {
            Unpair::Now => {
                if let Err(e) = self.link.unpair() {
                    warn!("Actions: unpair failed: {}", e);
                    first_err.get_or_insert(e.into());
                }
            }
            Unpair::Deferred => self.link.request_unpair_deferred(),
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Forget the bonded host and show the pairing light.
    pub fn enter_pairing(&self) -> Result<()> {
        self.link.unpair()?;
        self.indicator.show(Indication::Pairing);
        info!("Actions: pairing info cleared, discoverable");
        Ok(())
    }

    /// Restart advertising from scratch.
    pub fn readvertise(&self) -> Result<()> {
        if self.link.is_advertising() {
            self.link.stop_advertising()?;
        }
        self.link.start_advertising()?;
        Ok(())
    }

    /// Button gesture handler.
    pub fn on_button(&self, event: ButtonEvent) {
        let outcome = match event {
            ButtonEvent::Press => {
                self.power.prevent_sleep(SleepHold::Button, true);
                Ok(())
            }
            ButtonEvent::Release => {
                self.power.prevent_sleep(SleepHold::Button, false);
                Ok(())
            }
            ButtonEvent::Hold3s => self.enter_pairing(),
            ButtonEvent::Hold10s => {
                let reset = self.factory_reset(Unpair::Now);
                self.indicator.show(Indication::Off);
                reset
            }
            ButtonEvent::ReleaseAfter3s | ButtonEvent::ReleaseAfter10s => self.readvertise(),
        };
        if let Err(e) = outcome {
            warn!("Actions: {:?} handling failed: {}", event, e);
        }
    }
}
