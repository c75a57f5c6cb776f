//! Fuzz target for ref advertisement parsing.
//!
//! Tests that the parser handles arbitrary input without panicking and that
//! the default ref of a parsed advertisement is one of its refs.

#![no_main]

use gitload_protocol::RefAdvertisement;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(adv) = RefAdvertisement::parse_bytes(data) else {
        return;
    };
    if let Ok((name, id)) = adv.default_ref() {
        assert_eq!(adv.get(name), Some(id));
    }
});
