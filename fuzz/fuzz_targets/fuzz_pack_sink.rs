//! Fuzz target for the pack stream sink.
//!
//! Feeds arbitrary responses in arbitrary chunk sizes under every side-band
//! mode; the sink may reject the input but must not panic.

#![no_main]

use arbitrary::Arbitrary;
use gitload_protocol::{PackSink, SideBand, SinkStatus};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Mode {
    None,
    Basic,
    Large,
}

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    mode: Mode,
    chunk: u8,
    data: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    let side_band = match input.mode {
        Mode::None => SideBand::None,
        Mode::Basic => SideBand::Basic,
        Mode::Large => SideBand::Large,
    };
    let mut sink = PackSink::new(side_band);
    let chunk = usize::from(input.chunk).max(1);

    for part in input.data.chunks(chunk) {
        match sink.feed(part) {
            Ok(SinkStatus::NeedMore) => {}
            Ok(SinkStatus::Finished) | Err(_) => return,
        }
        assert!(sink.pack_bytes() <= input.data.len() as u64);
    }
    let _ = sink.finish();
});
