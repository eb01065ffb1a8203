#![no_main]
#![forbid(unsafe_code)]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let engine = clawguard::redact::default_engine();
        let once = engine.redact_text(s);
        // Redaction must be idempotent on arbitrary input.
        assert_eq!(engine.redact_text(&once), once);

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(s) {
            let _ = engine.redact_payload_deep(&value);
        }
    }
});
