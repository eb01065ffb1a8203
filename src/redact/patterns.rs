//! Built-in secret patterns.
//!
//! Ordered most-specific first: provider-prefixed tokens are rewritten before
//! the generic assignment forms so a `sk-ant-…` value is masked by its own
//! rule, not the catch-all. Every pattern is applied globally and
//! cumulatively; the named group `s` marks the secret span (the rest of the
//! match is preserved), and the PEM rule uses `h`/`f` for the block
//! delimiters.

use regex::Regex;
use std::sync::OnceLock;

/// The compiled built-in pattern table. Compiled once per process.
pub(crate) fn default_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DEFAULT_PATTERN_SOURCES
            .iter()
            .map(|src| Regex::new(src).expect("built-in redaction pattern must compile"))
            .collect()
    })
}

/// Raw sources for the built-in table. Kept as data so tests can assert
/// coverage without re-listing the regexes.
pub(crate) const DEFAULT_PATTERN_SOURCES: &[&str] = &[
    // PEM private-key blocks: keep delimiters, drop the body.
    r"(?P<h>-----BEGIN [A-Z0-9 ]*PRIVATE KEY-----)(?s:.*?)(?P<f>-----END [A-Z0-9 ]*PRIVATE KEY-----)",
    // Provider-prefixed tokens.
    r"(?P<s>\bsk-ant-[A-Za-z0-9_-]{16,})",
    r"(?P<s>\bsk-[A-Za-z0-9]{20,})",
    r"(?P<s>\bghp_[A-Za-z0-9]{20,})",
    r"(?P<s>\bgithub_pat_[A-Za-z0-9_]{22,})",
    r"(?P<s>\bxox[baprs]-[A-Za-z0-9-]{10,})",
    r"(?P<s>\bxapp-[A-Za-z0-9-]{10,})",
    r"(?P<s>\bgsk_[A-Za-z0-9]{16,})",
    r"(?P<s>\bAIza[A-Za-z0-9_-]{20,})",
    r"(?P<s>\bpplx-[A-Za-z0-9]{16,})",
    r"(?P<s>\bnpm_[A-Za-z0-9]{16,})",
    // Telegram-style DIGITS:TOKEN bot credentials.
    r"(?P<s>\b\d{6,10}:[A-Za-z0-9_-]{30,})",
    // Three-part JWTs.
    r"(?P<s>\beyJ[A-Za-z0-9_-]*\.eyJ[A-Za-z0-9_-]*\.[A-Za-z0-9_-]+)",
    // HTTP auth values, with or without the header name.
    r"(?i)\b(?:authorization\s*:\s*)?bearer\s+(?P<s>[A-Za-z0-9._~+/=-]{18,})",
    r"(?i)\bbasic\s+(?P<s>[A-Za-z0-9+/=]{20,})",
    // `NAME=VALUE` / `name: value` assignments for secret-bearing names.
    r#"(?i)\b[A-Za-z0-9_.-]*(?:api[_-]?key|key|token|secret|password|passwd)\b\s*[=:]\s*['"]?(?P<s>[A-Za-z0-9._~+/=-]{8,})"#,
    r#"(?i)\bservice[_-]?role\b['"]?\s*[=:]\s*['"]?(?P<s>[A-Za-z0-9._~+/=-]{8,})"#,
    // JSON field forms. The value class excludes the mask ellipsis so a
    // second pass over already-masked output is a no-op.
    r#"(?i)"[A-Za-z0-9_-]*(?:api[_-]?key|key|token|secret|password|passwd)"\s*:\s*"(?P<s>[^"…]{8,})""#,
    // CLI flag forms: `--api-key VALUE`, `--token=VALUE`, …
    r"(?i)--(?:api-?key|token|secret|password|auth-?token|access-?token|refresh-?token)[= ](?P<s>[^\s…]{8,})",
];

/// Variable names whose values never leave a safe environment snapshot.
pub(crate) fn sensitive_env_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)key|token|secret|password|passwd|credential|auth|private|supabase")
            .expect("env-name pattern must compile")
    })
}

/// Header names replaced wholesale, matched on the lowercased form.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "apikey",
    "api-key",
    "supabase-api-key",
    "x-supabase-auth",
    "x-access-token",
    "x-refresh-token",
    "proxy-authorization",
];

/// Payload keys replaced wholesale, matched on the lowercased form.
pub const SENSITIVE_PAYLOAD_KEYS: &[&str] = &[
    "token",
    "tokens",
    "key",
    "keys",
    "secret",
    "secrets",
    "password",
    "passwd",
    "api_key",
    "apikey",
    "access_token",
    "accesstoken",
    "refresh_token",
    "refreshtoken",
    "private_key",
    "privatekey",
    "service_role",
    "servicerole",
    "anon_key",
    "anonkey",
    "supabase_key",
    "supabasekey",
    "credentials",
    "auth",
];
