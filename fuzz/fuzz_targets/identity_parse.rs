#![no_main]

use areyouok_core::{Identity, SwitchId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing must never panic, and anything accepted must print back to
    // the canonical form that parses to the same value.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(id) = s.parse::<Identity>() {
            let canonical = id.to_string();
            assert_eq!(canonical.parse::<Identity>().ok(), Some(id));
        }
        let _ = s.parse::<SwitchId>();
    }
});
