//! Connectivity state machine.
//!
//! Owns the [`ConnectionState`] snapshot and every decision about
//! advertising, pairing and unpairing. Radio callbacks land here through
//! `on_*` methods; workers read the snapshot through accessors that hold
//! the state lock only for the field copy.
//!
//! ## Pairing policy
//!
//! One bonded peer at a time. While the radio stack holds no bond the
//! device advertises openly and shows the pairing indication. Once a
//! bond exists the stack only accepts that peer; link-layer key checks
//! stay inside the stack. Unpairing clears the bonds and the cached
//! static random address, so the next advertisement uses a fresh one.
//!
//! ```text
//!            start_advertising            on_connect
//!   Idle ───────────────────────▶ Advertising ─────────▶ Connected
//!    ▲                                 ▲                    │
//!    │ set_auto_advertise(false)       │ poll()             │ on_disconnect
//!    └─────────────────────────────────┴────────────────────┘
//! ```
//!
//! Unpair requests raised from a radio callback are deferred: the flag is
//! drained by [`Connectivity::poll`] on the next scheduler tick.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::adapters::nvs::NAMESPACE;
use crate::app::ports::{
    Address, Indication, IndicatorPort, RadioPort, ReplySink, SharedStorage, StorageError,
};
use crate::error::LinkError;
use crate::rpc::codec::encode_frame;
use crate::signals::{self, EventFlags};

/// Storage key of the cached static random address.
pub const ADDRESS_KEY: &str = "ble_addr";

/// Snapshot of the link, copied out under the state lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub advertising: bool,
    pub connected: bool,
    pub bonded_peers: usize,
    pub notifications_enabled: bool,
    pub peer: Option<Address>,
}

pub struct Connectivity {
    radio: Arc<dyn RadioPort>,
    indicator: Arc<dyn IndicatorPort>,
    storage: SharedStorage,
    flags: Arc<EventFlags>,
    state: Mutex<ConnectionState>,
    send_lock: Mutex<()>,
    auto_advertise: AtomicBool,
    unpair_pending: AtomicBool,
}

impl Connectivity {
    pub fn new(
        radio: Arc<dyn RadioPort>,
        indicator: Arc<dyn IndicatorPort>,
        storage: SharedStorage,
        flags: Arc<EventFlags>,
    ) -> Self {
        let bonded_peers = radio.bonded_count();
        Self {
            radio,
            indicator,
            storage,
            flags,
            state: Mutex::new(ConnectionState {
                bonded_peers,
                ..ConnectionState::default()
            }),
            send_lock: Mutex::new(()),
            auto_advertise: AtomicBool::new(true),
            unpair_pending: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ConnectionState {
        *self.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_advertising(&self) -> bool {
        self.state().advertising
    }

    /// Connected, and the host has both subscribed and announced itself.
    pub fn notifications_enabled(&self) -> bool {
        let s = self.state();
        s.connected && s.notifications_enabled
    }

    /// Advertising with no bonded peer: a host is expected to pair.
    pub fn in_pairing_mode(&self) -> bool {
        let s = self.state();
        s.advertising && s.bonded_peers == 0
    }

    pub fn set_auto_advertise(&self, enabled: bool) {
        self.auto_advertise.store(enabled, Ordering::Release);
    }

    // ── Radio callbacks ───────────────────────────────────────

    pub fn on_connect(&self, peer: Address) {
        {
            let mut s = self.state();
            s.connected = true;
            s.advertising = false;
            s.peer = Some(peer);
        }
        info!(
            "Link: connected to {:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            peer[5], peer[4], peer[3], peer[2], peer[1], peer[0]
        );
        self.indicator.show(Indication::Connected);
        self.flags.set(signals::CONNECTED);
    }

    pub fn on_disconnect(&self) {
        {
            let mut s = self.state();
            s.connected = false;
            s.peer = None;
            s.notifications_enabled = false;
        }
        self.flags.clear(signals::SUBSCRIBED | signals::CONNECTED);
        self.flags.set(signals::DISCONNECTED);
        info!("Link: disconnected");
        self.indicator.show(Indication::Disconnected);
    }

    /// Pairing completed; refresh the bond count.
    pub fn on_bonded(&self) {
        let count = self.radio.bonded_count();
        let changed = {
            let mut s = self.state();
            let changed = s.bonded_peers != count;
            s.bonded_peers = count;
            changed
        };
        info!("Link: bonded ({} peer(s))", count);
        if changed {
            self.indicator.show(Indication::Bonded);
        }
    }

    /// The host announced itself on the data characteristic.
    pub fn enable_notifications(&self) {
        self.state().notifications_enabled = true;
    }

    /// Called from a radio callback; the teardown runs on the next [`poll`](Self::poll).
    pub fn request_unpair_deferred(&self) {
        self.unpair_pending.store(true, Ordering::Release);
    }

    // ── Scheduler ─────────────────────────────────────────────

    /// Drain deferred work and keep advertising while idle.
    pub fn poll(&self) {
        if self.unpair_pending.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.unpair() {
                warn!("Link: deferred unpair failed: {}", e);
            }
        }

        let idle = {
            let s = self.state();
            !s.connected && !s.advertising
        };
        if idle && self.auto_advertise.load(Ordering::Acquire) {
            if let Err(e) = self.start_advertising() {
                warn!("Link: advertising restart failed: {}", e);
            }
        }
    }

    // ── Advertising ───────────────────────────────────────────

    fn cached_address(&self) -> Result<Address, StorageError> {
        let mut storage = self.storage.lock().map_err(|_| StorageError::IoError)?;
        let mut addr: Address = [0; 6];
        match storage.read(NAMESPACE, ADDRESS_KEY, &mut addr) {
            Ok(6) => Ok(addr),
            Ok(_) | Err(StorageError::NotFound) | Err(StorageError::TooLarge) => {
                let fresh = self.radio.generate_address();
                storage.write(NAMESPACE, ADDRESS_KEY, &fresh)?;
                info!("Link: new static address generated");
                Ok(fresh)
            }
            Err(e) => Err(e),
        }
    }

    pub fn start_advertising(&self) -> Result<(), LinkError> {
        match self.cached_address() {
            Ok(addr) => self.radio.set_address(addr)?,
            Err(e) => warn!("Link: address cache unavailable ({}), keeping current", e),
        }
        self.radio.start_advertising()?;

        let bonded = self.radio.bonded_count();
        {
            let mut s = self.state();
            s.advertising = true;
            s.bonded_peers = bonded;
        }
        info!("Link: advertising ({} bonded)", bonded);
        self.indicator.show(if bonded == 0 {
            Indication::Pairing
        } else {
            Indication::Reconnecting
        });
        Ok(())
    }

    pub fn stop_advertising(&self) -> Result<(), LinkError> {
        self.radio.stop_advertising()?;
        self.state().advertising = false;
        info!("Link: advertising stopped");
        self.indicator.show(Indication::Idle);
        Ok(())
    }

    /// Drop the connection, if any. Completion arrives via [`on_disconnect`](Self::on_disconnect).
    pub fn disconnect(&self) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Ok(());
        }
        info!("Link: disconnecting");
        self.radio.disconnect()
    }

    /// Forget the bonded peer and the cached address, then re-advertise
    /// on the next poll.
    pub fn unpair(&self) -> Result<(), LinkError> {
        info!("Link: unpairing");
        if let Err(e) = self.disconnect() {
            warn!("Link: disconnect during unpair failed: {}", e);
        }
        if self.is_advertising() {
            self.stop_advertising()?;
        }
        self.radio.clear_bonds()?;
        self.forget_address();
        {
            let mut s = self.state();
            s.bonded_peers = 0;
            s.advertising = false;
        }
        Ok(())
    }

    /// Delete the cached static address.
    pub fn forget_address(&self) {
        match self.storage.lock() {
            Ok(mut storage) => {
                if let Err(e) = storage.delete(NAMESPACE, ADDRESS_KEY) {
                    warn!("Link: could not delete cached address: {}", e);
                }
            }
            Err(_) => warn!("Link: storage lock poisoned"),
        }
    }

    pub fn send_wake_key(&self) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.radio.send_wake_key()
    }
}

impl ReplySink for Connectivity {
    fn send(&self, kind: u8, payload: &[u8]) -> Result<(), LinkError> {
        let _guard = self.send_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let frame = encode_frame(kind, payload)?;
        self.radio.notify(&frame)
    }
}
