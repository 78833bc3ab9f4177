//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements                  | Connects to                  |
//! |-----------------|-----------------------------|------------------------------|
//! | `ble`           | RadioPort                   | Bluedroid GATT + HID wake    |
//! | `sensor`        | SensorPort, IndicatorPort   | Fingerprint module on UART   |
//! | `nvs`           | StoragePort, ConfigPort     | NVS / in-memory store        |
//! | `ota_partition` | FirmwareTarget              | Inactive app partition       |
//! | `platform`      | PlatformPort                | GPIO interrupts, light sleep |
//! | `time`          | Clock                       | ESP32 system timer           |
//! | `device_id`     | -                           | Factory MAC                  |
//!
//! Every adapter has a host simulation so the orchestration layer runs
//! under `cargo test` without hardware.

pub mod ble;
pub mod device_id;
pub mod nvs;
pub mod ota_partition;
pub mod platform;
pub mod sensor;
pub mod time;
