#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // ebusd replies are line based text; feed arbitrary lines through the parsers
    let text = String::from_utf8_lossy(data);
    for line in text.lines() {
        if let Ok(value) = hestia::backend::ebusd::parse_reply(line) {
            let _ = hestia::backend::ebusd::parse_number("fuzz", value);
        }
        let _ = hestia::backend::ebusd::parse_circuit(line);
    }
});
