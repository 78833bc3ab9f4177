//! Fuzz target: inbound write parsing
//!
//! Splits arbitrary writes into command frames and runs every payload
//! parser over them. None of them may panic, and a frame never holds
//! more than MAX_PAYLOAD bytes.
//!
//! cargo fuzz run fuzz_host_write

#![no_main]

use fingerlock::rpc::codec::{CommandFrame, MAX_PAYLOAD, parse_hex_u32, parse_label, read_u32_le};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some(frame) = CommandFrame::from_write(data) else {
        assert!(data.is_empty());
        return;
    };
    assert!(frame.payload.len() <= MAX_PAYLOAD);
    assert_eq!(frame.declared_len, data.len() - 1);

    let payload = frame.payload.as_slice();
    let _ = frame.command();
    let _ = read_u32_le(payload);
    let _ = parse_hex_u32(payload);
    if let Ok((_, label)) = parse_label(payload) {
        assert!(!label.as_bytes().contains(&0));
    }
});
