#![no_main]
#![forbid(unsafe_code)]
use libfuzzer_sys::fuzz_target;
use clawguard::allowlist::IpAllowlist;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(list) = IpAllowlist::parse(s) {
            // Any successfully parsed list must answer membership queries
            // without panicking.
            let _ = list.matches("192.0.2.1");
            let _ = list.matches("2001:db8::1");
            let _ = list.matches(s);
        }
    }
});
