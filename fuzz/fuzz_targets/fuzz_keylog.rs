#![no_main]
use libfuzzer_sys::fuzz_target;
use rdpcarve::tls::keylog::SecretStore;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = SecretStore::parse(text);
    }
});
