//! Inactive application partition behind [`FirmwareTarget`].
//!
//! On the device this wraps `esp-ota`; dropping an unfinished
//! `OtaUpdate` aborts it, so `abort` only has to let go of the handle.
//! The host build keeps the image in memory.

use log::warn;

use crate::app::ports::FirmwareTarget;
use crate::rpc::ota::OtaError;

#[cfg(target_os = "espidf")]
#[derive(Default)]
pub struct EspPartition {
    update: Option<esp_ota::OtaUpdate>,
}

#[cfg(target_os = "espidf")]
impl EspPartition {
    pub fn new() -> Self {
        Self::default()
    }
}

// SAFETY: the update handle is only touched by the command worker that
// owns the engine; the partition table it points into is static.
#[cfg(target_os = "espidf")]
unsafe impl Send for EspPartition {}

#[cfg(target_os = "espidf")]
impl FirmwareTarget for EspPartition {
    fn begin(&mut self) -> Result<(), OtaError> {
        self.update = None;
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("OTA: partition begin failed: {:?}", e);
            OtaError::BeginFailed
        })?;
        self.update = Some(update);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), OtaError> {
        let update = self.update.as_mut().ok_or(OtaError::NotStarted)?;
        update.write(data).map_err(|e| {
            warn!("OTA: partition write failed: {:?}", e);
            OtaError::WriteFailed
        })
    }

    fn abort(&mut self) {
        self.update.take();
    }

    fn commit(&mut self) -> Result<(), OtaError> {
        let update = self.update.take().ok_or(OtaError::NotStarted)?;
        let mut completed = update.finalize().map_err(|e| {
            warn!("OTA: image verification failed: {:?}", e);
            OtaError::VerifyFailed
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("OTA: set boot partition failed: {:?}", e);
            OtaError::BootSetFailed
        })
    }
}

/// In-memory partition for host builds and tests.
#[derive(Debug, Default)]
pub struct SimPartition {
    staging: Option<Vec<u8>>,
    boot: Option<Vec<u8>>,
    fail_writes: bool,
}

impl SimPartition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image committed by the last successful update.
    pub fn boot_image(&self) -> Option<&[u8]> {
        self.boot.as_deref()
    }

    /// Whether a partial image is being written.
    pub fn is_open(&self) -> bool {
        self.staging.is_some()
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl FirmwareTarget for SimPartition {
    fn begin(&mut self) -> Result<(), OtaError> {
        self.staging = Some(Vec::new());
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), OtaError> {
        if self.fail_writes {
            return Err(OtaError::WriteFailed);
        }
        let staging = self.staging.as_mut().ok_or(OtaError::NotStarted)?;
        staging.extend_from_slice(data);
        Ok(())
    }

    fn abort(&mut self) {
        if self.staging.take().is_some() {
            warn!("OTA(sim): partial image discarded");
        }
    }

    fn commit(&mut self) -> Result<(), OtaError> {
        let image = self.staging.take().ok_or(OtaError::NotStarted)?;
        if image.is_empty() {
            return Err(OtaError::VerifyFailed);
        }
        self.boot = Some(image);
        Ok(())
    }
}
