//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable, human-readable device ID in the form `FL-XXYYZZ`
//! (last 3 bytes of the 6-byte MAC in uppercase hex). This ID is:
//! - Deterministic across reboots (factory-burned eFuse MAC)
//! - Reported in the `GET_INFO` reply
//! - Used in the advertised name (`FingerLock-XXYYZZ`)

use core::fmt::Write;

/// Firmware version reported to the host.
pub const FIRMWARE_VERSION: &str = "1.2";

/// Build date reported to the host, when the build sets one.
pub const BUILD_DATE: &str = match option_env!("FINGERLOCK_BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};

/// Fixed-size device ID string: "FL-XXYYZZ".
pub type DeviceIdString = heapless::String<16>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: writes exactly six bytes into `mac`.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

pub fn device_id(mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    let _ = write!(id, "FL-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}

/// Advertised GAP name.
pub fn device_name(mac: &MacAddress) -> heapless::String<24> {
    let mut name = heapless::String::<24>::new();
    let _ = write!(name, "FingerLock-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_format() {
        let mac = [0x00, 0x11, 0x22, 0xAA, 0xBB, 0xCC];
        assert_eq!(device_id(&mac).as_str(), "FL-AABBCC");
    }

    #[test]
    fn device_name_format() {
        let mac = [0x00, 0x11, 0x22, 0xAA, 0xBB, 0xCC];
        assert_eq!(device_name(&mac).as_str(), "FingerLock-AABBCC");
    }

    #[test]
    fn id_fits_info_field() {
        let id = device_id(&read_mac());
        assert_eq!(id.as_str(), "FL-EFCAFE");
        assert!(id.len() < crate::rpc::codec::DEVICE_ID_LEN);
    }
}
