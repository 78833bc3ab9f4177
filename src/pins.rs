//! GPIO / peripheral pin assignments for the FingerLock board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.  Change a pin here and it propagates everywhere.

// ---------------------------------------------------------------------------
// Fingerprint module (UART + touch + supply switch)
// ---------------------------------------------------------------------------

/// UART RX (module TX → MCU).
pub const SENSOR_RX_GPIO: i32 = 2;
/// UART TX (MCU → module RX).
pub const SENSOR_TX_GPIO: i32 = 3;
/// Digital input: HIGH while a finger rests on the sensor.
/// Doubles as the level-triggered light-sleep wake source.
pub const SENSOR_TOUCH_GPIO: i32 = 19;
/// Digital output: module supply switch, HIGH = powered.
pub const SENSOR_POWER_GPIO: i32 = 10;
/// Module UART baud rate (UART1).
pub const SENSOR_BAUD: u32 = 57_600;

// ---------------------------------------------------------------------------
// User input
// ---------------------------------------------------------------------------

/// Pairing button, active LOW with internal pull-up.
/// Doubles as the level-triggered light-sleep wake source.
pub const BUTTON_GPIO: i32 = 7;
