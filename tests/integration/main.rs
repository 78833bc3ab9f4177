//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one subsystem against
//! the host simulations. All tests run on the host with no real hardware.

#![cfg(not(target_os = "espidf"))]

mod actions_tests;
mod engine_tests;
mod mock_hw;
mod power_tests;
mod unlock_tests;
