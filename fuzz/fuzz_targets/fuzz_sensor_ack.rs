//! Fuzz target: sensor acknowledgement decoding
//!
//! cargo fuzz run fuzz_sensor_ack

#![no_main]

use fingerlock::adapters::sensor::decode_ack;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(ack) = decode_ack(data) {
        // data sits between the confirmation byte and the checksum
        assert!(ack.data.len() + 12 <= data.len());
        let _ = ack.into_result();
    }
});
