#![no_main]

use areyouok_core::{format_units, parse_units};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(amount) = parse_units(s) {
            assert_eq!(parse_units(&format_units(amount)), Ok(amount));
        }
    }

    // Every representable amount formats to something parse_units accepts.
    if data.len() >= 16 {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&data[..16]);
        let amount = u128::from_le_bytes(raw);
        assert_eq!(parse_units(&format_units(amount)), Ok(amount));
    }
});
