#![no_main]

use libfuzzer_sys::fuzz_target;

use rollcall::commands::{Command, TapAction};

fuzz_target!(|data: &str| {
    // Message texts and callback data are user-controlled.
    let _ = Command::parse(data);
    if let Some(action) = TapAction::parse(data) {
        assert_eq!(action.callback_data(), data);
    }
});
