//! FingerLock firmware library.
//!
//! Exposes the orchestration modules for integration testing. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; host builds get simulation backends.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod link;
pub mod pins;
pub mod power;
pub mod rpc;
pub mod signals;
pub mod unlock;
