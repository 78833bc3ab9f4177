//! CRC-32/IEEE (reflected, poly 0xEDB88320) with a const-built table.
//!
//! Chainable: `update(update(0, a), b) == update(0, a ++ b)`, matching the
//! ROM `crc32_le` the host-side tool checks against.

const POLY: u32 = 0xEDB8_8320;

static TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Fold `data` into a running checksum. Start with `crc = 0`.
pub fn update(crc: u32, data: &[u8]) -> u32 {
    let mut c = !crc;
    for &b in data {
        c = TABLE[((c ^ u32::from(b)) & 0xFF) as usize] ^ (c >> 8);
    }
    !c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(update(0, b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input_keeps_value() {
        assert_eq!(update(0, &[]), 0);
        assert_eq!(update(0x1234_5678, &[]), 0x1234_5678);
    }

    #[test]
    fn chaining_matches_one_shot() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let (a, b) = data.split_at(17);
        assert_eq!(update(update(0, a), b), update(0, data));
        assert_eq!(update(0, data), 0x414F_A339);
    }
}
