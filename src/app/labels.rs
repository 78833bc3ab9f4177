//! Per-template labels kept next to the sensor's template library.
//!
//! The sensor only knows numeric ids; the host shows names. Each label is
//! a UTF-8 blob under `fp_name_<id>` in the device namespace.

use core::fmt::Write;

use heapless::{String, Vec};
use log::{debug, info};

use crate::adapters::nvs::NAMESPACE;
use crate::app::ports::{IndexTable, SharedStorage, StorageError};
use crate::rpc::codec::{LABEL_LEN, Label, MAX_TEMPLATES};

type Key = String<16>;

fn key(id: u8) -> Key {
    let mut k = Key::new();
    let _ = write!(k, "fp_name_{}", id);
    k
}

/// Ids marked enrolled in `table`, ascending, limited to the library size.
pub fn enrolled_ids(table: &IndexTable) -> impl Iterator<Item = u8> + '_ {
    table
        .iter()
        .enumerate()
        .flat_map(|(byte, &bits)| {
            (0..8usize)
                .filter(move |&bit| bits & (1u8 << bit) != 0)
                .map(move |bit| byte * 8 + bit)
        })
        .filter(|&id| id < MAX_TEMPLATES)
        .map(|id| id as u8)
}

/// Default label assigned right after enrollment.
pub fn default_label(id: u8) -> Label {
    let mut l = Label::new();
    let _ = write!(l, "Finger {}", u16::from(id) + 1);
    l
}

pub struct LabelStore {
    storage: SharedStorage,
}

impl LabelStore {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    pub fn get(&self, id: u8) -> Result<Option<Label>, StorageError> {
        let mut buf = [0u8; LABEL_LEN];
        let read = {
            let storage = self.storage.lock().map_err(|_| StorageError::IoError)?;
            storage.read(NAMESPACE, &key(id), &mut buf)
        };
        match read {
            Ok(len) => {
                let text = core::str::from_utf8(&buf[..len]).map_err(|_| StorageError::IoError)?;
                Ok(Label::try_from(text).ok())
            }
            Err(StorageError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set(&self, id: u8, label: &str) -> Result<(), StorageError> {
        if label.len() > LABEL_LEN {
            return Err(StorageError::TooLarge);
        }
        let mut storage = self.storage.lock().map_err(|_| StorageError::IoError)?;
        storage.write(NAMESPACE, &key(id), label.as_bytes())?;
        info!("Labels: {} -> '{}'", id, label);
        Ok(())
    }

    pub fn remove(&self, id: u8) -> Result<(), StorageError> {
        let mut storage = self.storage.lock().map_err(|_| StorageError::IoError)?;
        storage.delete(NAMESPACE, &key(id))?;
        debug!("Labels: {} removed", id);
        Ok(())
    }

    /// Remove every label.
    pub fn clear(&self) -> Result<(), StorageError> {
        for id in 0..MAX_TEMPLATES as u8 {
            self.remove(id)?;
        }
        Ok(())
    }

    /// `(id, label)` for every enrolled template that has a label.
    pub fn list(&self, table: &IndexTable) -> Result<Vec<(u8, Label), MAX_TEMPLATES>, StorageError> {
        let mut out = Vec::new();
        for id in enrolled_ids(table) {
            if let Some(label) = self.get(id)? {
                let _ = out.push((id, label));
            }
        }
        Ok(out)
    }
}
