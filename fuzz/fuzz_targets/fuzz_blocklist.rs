#![no_main]
#![forbid(unsafe_code)]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = clawguard::blocklist::check_one_liner(s);
        let _ = clawguard::blocklist::suspicious_one_liner(s);
    }
});
