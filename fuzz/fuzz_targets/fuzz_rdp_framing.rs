#![no_main]
use libfuzzer_sys::fuzz_target;
use rdpcarve::replay::{ProtocolStack, RdpFramingStack, Side};

fuzz_target!(|data: &[u8]| {
    let mut stack = RdpFramingStack::new();
    // Feed in uneven chunks, alternating sides
    for (i, chunk) in data.chunks(7).enumerate() {
        let side = if i % 2 == 0 { Side::Client } else { Side::Server };
        let _ = stack.receive(side, chunk);
    }
});
