//! Fuzz target for pkt-line decoding.
//!
//! Decodes the input in one piece and again fed in two parts split at an
//! arbitrary point; both must yield the same packets.

#![no_main]

use gitload_protocol::{decode_all, PktLineDecoder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u16, &[u8])| {
    let (split, data) = input;
    let whole = decode_all(data);

    let split = usize::from(split) % (data.len() + 1);
    let mut decoder = PktLineDecoder::new();
    let mut incremental = Vec::new();
    let mut failed = false;
    for part in [&data[..split], &data[split..]] {
        decoder.feed(part);
        loop {
            match decoder.next_pkt() {
                Ok(Some(pkt)) => incremental.push(pkt),
                Ok(None) => break,
                Err(_) => {
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            break;
        }
    }
    if !failed && decoder.finish().is_err() {
        failed = true;
    }

    match whole {
        Ok(packets) => {
            assert!(!failed);
            assert_eq!(packets, incremental);
        }
        Err(_) => assert!(failed),
    }
});
