#![no_main]

use libfuzzer_sys::fuzz_target;

use rollcall::channels::Update;

fuzz_target!(|data: &[u8]| {
    // Webhook bodies come straight from the network. Deserialization and
    // routing must never panic, whatever shape the JSON takes.
    if let Ok(update) = serde_json::from_slice::<Update>(data) {
        let _ = update.into_inbound();
    }
});
