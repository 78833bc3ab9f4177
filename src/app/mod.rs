//! Application core: port traits and the device-level logic that sits on
//! top of them.
//!
//! Nothing in here touches hardware directly. All I/O goes through the
//! traits in [`ports`], so the label store and the shared device actions
//! are testable against the host simulations.

pub mod actions;
pub mod labels;
pub mod ports;
