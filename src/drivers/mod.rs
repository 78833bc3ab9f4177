//! Input drivers, GPIO setup, worker threads and the watchdog.

pub mod button;
pub mod gpio;
pub mod task_pin;
pub mod watchdog;
