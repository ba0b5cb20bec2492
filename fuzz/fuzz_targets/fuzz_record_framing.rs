#![no_main]
use libfuzzer_sys::fuzz_target;
use rdpcarve::tls::record::{frame_records, Framing};

fuzz_target!(|data: &[u8]| {
    if let Framing::Complete(records) = frame_records(data) {
        let total: usize = records.iter().map(|r| r.bytes.len()).sum();
        assert_eq!(total, data.len());
    }
});
