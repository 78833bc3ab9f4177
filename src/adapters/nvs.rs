//! NVS (Non-Volatile Storage) adapter.
//!
//! [`NvsAdapter`] implements [`StoragePort`] over the ESP-IDF NVS blob API
//! (or an in-memory map on the host). [`NvsConfig`] implements
//! [`ConfigPort`] on top of any shared [`StoragePort`], so configuration,
//! labels and the cached radio address all live in the same namespace.
//!
//! # Layout (namespace `fingerlock`)
//!
//! | Key           | Value                                 |
//! |---------------|---------------------------------------|
//! | `devcfg`      | postcard-encoded [`DeviceConfig`]     |
//! | `ble_addr`    | 6-byte static random address          |
//! | `fp_name_<n>` | UTF-8 label of template `n`           |
//!
//! NVS commits are atomic per `nvs_commit()`; a factory reset erases the
//! whole namespace.

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, SharedStorage, StorageError, StoragePort};
use crate::config::DeviceConfig;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Namespace for every persisted item.
pub const NAMESPACE: &str = "fingerlock";
const CONFIG_KEY: &str = "devcfg";

const MAX_BLOB_SIZE: usize = 256;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: HashMap<String, Vec<u8>>,
}

impl NvsAdapter {
    /// Initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised automatically.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // main task before any worker touches storage.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES as i32 || ret == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK as i32 {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK as i32 {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK as i32 {
                return Err(StorageError::IoError);
            }
            info!("NVS: flash initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NVS(sim): in-memory backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: HashMap::new(),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// NUL-terminated copy of `name`, cut to the 15-byte NVS limit.
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        // SAFETY: `ns` is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK as i32 {
            return Err(ret);
        }

        let result = f(handle);
        // SAFETY: handle was opened above and is not used afterwards.
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn commit(handle: nvs_handle_t) -> Result<(), i32> {
        // SAFETY: handle is open for writing.
        let ret = unsafe { nvs_commit(handle) };
        if ret != ESP_OK as i32 {
            return Err(ret);
        }
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let data = self
                .store
                .get(&Self::composite_key(namespace, key))
                .ok_or(StorageError::NotFound)?;
            if data.len() > buf.len() {
                return Err(StorageError::TooLarge);
            }
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let mut size = buf.len();
                // SAFETY: `buf` is valid for `size` bytes.
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                if ret != ESP_OK as i32 {
                    return Err(ret);
                }
                Ok(size)
            });
            match result {
                Ok(size) => Ok(size),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND as i32 => Err(StorageError::NotFound),
                Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH as i32 => Err(StorageError::TooLarge),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::TooLarge);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .insert(Self::composite_key(namespace, key), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                // SAFETY: `data` is valid for its length; NVS copies it.
                let ret = unsafe {
                    nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
                };
                if ret != ESP_OK as i32 {
                    return Err(ret);
                }
                Self::commit(handle)
            });
            result.map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE as i32 {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store.remove(&Self::composite_key(namespace, key));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                // SAFETY: key is NUL-terminated.
                let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
                if ret != ESP_OK as i32 && ret != ESP_ERR_NVS_NOT_FOUND as i32 {
                    return Err(ret);
                }
                Self::commit(handle)
            });
            match result {
                Ok(()) => Ok(()),
                // Namespace never written: nothing to delete.
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND as i32 => Ok(()),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            self.store.contains_key(&Self::composite_key(namespace, key))
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(key);
            Self::with_nvs_handle(namespace, false, |handle| {
                // SAFETY: key is NUL-terminated; the type out-param is optional.
                let ret = unsafe { nvs_find_key(handle, key.as_ptr().cast(), core::ptr::null_mut()) };
                Ok(ret == ESP_OK as i32)
            })
            .unwrap_or(false)
        }
    }

    fn erase_namespace(&mut self, namespace: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let prefix = format!("{}::", namespace);
            self.store.retain(|k, _| !k.starts_with(&prefix));
            info!("NVS(sim): namespace '{}' erased", namespace);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                // SAFETY: handle is open for writing.
                let ret = unsafe { nvs_erase_all(handle) };
                if ret != ESP_OK as i32 {
                    return Err(ret);
                }
                Self::commit(handle)
            });
            match result {
                Ok(()) => {
                    info!("NVS: namespace '{}' erased", namespace);
                    Ok(())
                }
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND as i32 => Ok(()),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }
}

// ── Configuration ─────────────────────────────────────────────

fn validate_config(cfg: &DeviceConfig) -> Result<(), ConfigError> {
    if cfg.sleep_timeout_secs > 7 * 24 * 3600 {
        return Err(ConfigError::ValidationFailed(
            "sleep_timeout_secs must be 0–604800",
        ));
    }
    if !(100..=60_000).contains(&cfg.disconnect_wait_ms) {
        return Err(ConfigError::ValidationFailed(
            "disconnect_wait_ms must be 100–60000",
        ));
    }
    if !(50..=5_000).contains(&cfg.sensor_ready_wait_ms) {
        return Err(ConfigError::ValidationFailed(
            "sensor_ready_wait_ms must be 50–5000",
        ));
    }
    if !(500..=60_000).contains(&cfg.connect_wait_ms) {
        return Err(ConfigError::ValidationFailed(
            "connect_wait_ms must be 500–60000",
        ));
    }
    if !(500..=60_000).contains(&cfg.subscribe_wait_ms) {
        return Err(ConfigError::ValidationFailed(
            "subscribe_wait_ms must be 500–60000",
        ));
    }
    if !(50..=10_000).contains(&cfg.lock_screen_query_ms) {
        return Err(ConfigError::ValidationFailed(
            "lock_screen_query_ms must be 50–10000",
        ));
    }
    if cfg.wake_resend_settle_ms > 10_000 {
        return Err(ConfigError::ValidationFailed(
            "wake_resend_settle_ms must be 0–10000",
        ));
    }
    if cfg.match_cooldown_ms > 10_000 {
        return Err(ConfigError::ValidationFailed(
            "match_cooldown_ms must be 0–10000",
        ));
    }
    if !(100..=10_000).contains(&cfg.restart_delay_ms) {
        return Err(ConfigError::ValidationFailed(
            "restart_delay_ms must be 100–10000",
        ));
    }
    Ok(())
}

/// [`ConfigPort`] over a shared storage backend.
pub struct NvsConfig {
    storage: SharedStorage,
}

impl NvsConfig {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }
}

impl ConfigPort for NvsConfig {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        let mut buf = [0u8; MAX_BLOB_SIZE];
        let read = {
            let storage = self.storage.lock().map_err(|_| ConfigError::IoError)?;
            storage.read(NAMESPACE, CONFIG_KEY, &mut buf)
        };
        match read {
            Ok(len) => match postcard::from_bytes::<DeviceConfig>(&buf[..len]) {
                Ok(cfg) => {
                    info!("Config: loaded ({} bytes)", len);
                    Ok(cfg)
                }
                Err(_) => {
                    warn!("Config: stored blob corrupted, using defaults");
                    Ok(DeviceConfig::default())
                }
            },
            Err(StorageError::NotFound) => {
                info!("Config: none stored, using defaults");
                Ok(DeviceConfig::default())
            }
            Err(e) => {
                warn!("Config: read error ({}), using defaults", e);
                Ok(DeviceConfig::default())
            }
        }
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        let mut storage = self.storage.lock().map_err(|_| ConfigError::IoError)?;
        storage
            .write(NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|e| match e {
                StorageError::Full => ConfigError::StorageFull,
                _ => ConfigError::IoError,
            })?;
        info!("Config: saved ({} bytes)", bytes.len());
        Ok(())
    }
}
