//! Fuzz target: firmware update inflater
//!
//! Feeds arbitrary bytes as compressed update chunks. The pipeline must
//! reject garbage with a typed error and always be restartable.
//!
//! cargo fuzz run fuzz_update_stream

#![no_main]

use fingerlock::adapters::ota_partition::SimPartition;
use fingerlock::rpc::ota::UpdateEngine;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut ota = UpdateEngine::new(SimPartition::new());
    if ota.start(data.len().max(1) as u32).is_err() {
        return;
    }
    for chunk in data.chunks(97) {
        if ota.chunk(chunk).is_err() {
            break;
        }
    }
    let _ = ota.finish(0);
    assert!(!ota.is_active());
    assert!(!ota.target().is_open());
    assert!(ota.start(1).is_ok());
});
