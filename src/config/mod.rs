//! Security-core configuration and the environment interface.
//!
//! The surrounding gateway owns config loading; this module defines the
//! security sections it deserializes into, plus the environment-variable
//! surface the guards consult. Bind decisions are pure over an
//! [`EnvSnapshot`] so callers can capture the environment once and replay it
//! deterministically in tests.

use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Immutable name → value mapping captured from the process environment.
pub type EnvSnapshot = BTreeMap<String, String>;

/// Prefix for every environment variable this crate consumes.
pub const ENV_PREFIX: &str = "CLAWGUARD_";

/// Environment variable names, spelled out so call sites stay greppable.
pub mod env_keys {
    /// `"true"` opts into binding a public interface.
    pub const ALLOW_PUBLIC_BIND: &str = "CLAWGUARD_ALLOW_PUBLIC_BIND";
    /// Comma-separated IPs/CIDRs admitted to a public bind.
    pub const PUBLIC_BIND_IP_ALLOWLIST: &str = "CLAWGUARD_PUBLIC_BIND_IP_ALLOWLIST";
    /// `"true"` means mutual TLS is required, which counts as strong auth.
    pub const REQUIRE_MTLS: &str = "CLAWGUARD_REQUIRE_MTLS";
    /// Non-empty issuer URL counts as strong auth.
    pub const OIDC_ISSUER: &str = "CLAWGUARD_OIDC_ISSUER";
    /// Presence counts as basic auth.
    pub const GATEWAY_TOKEN: &str = "CLAWGUARD_GATEWAY_TOKEN";
    /// Presence counts as basic auth.
    pub const GATEWAY_PASSWORD: &str = "CLAWGUARD_GATEWAY_PASSWORD";
    /// `"true"` opts into installing skills from remote sources.
    pub const SKILLS_ALLOW_REMOTE_INSTALL: &str = "CLAWGUARD_SKILLS_ALLOW_REMOTE_INSTALL";
    /// Overrides the default state directory (`~/.clawguard`).
    pub const STATE_DIR: &str = "CLAWGUARD_STATE_DIR";
    /// Optional webhook endpoint for anomaly notifications.
    pub const SECURITY_WEBHOOK_URL: &str = "CLAWGUARD_SECURITY_WEBHOOK_URL";
}

/// Capture the current process environment as a snapshot.
pub fn env_snapshot_from_process() -> EnvSnapshot {
    std::env::vars().collect()
}

/// True when the variable is present and equals `"true"` exactly
/// (case-insensitive). Any other value is treated as absent.
pub fn env_flag(env: &EnvSnapshot, key: &str) -> bool {
    env.get(key)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// The variable's value when present and non-empty after trimming.
pub fn env_nonempty<'a>(env: &'a EnvSnapshot, key: &str) -> Option<&'a str> {
    env.get(key).map(String::as_str).map(str::trim).filter(|v| !v.is_empty())
}

/// Whether the operator opted into remote skill installation.
///
/// The security core only observes this flag; the skill installer is the
/// enforcement point.
pub fn skills_remote_install_allowed(env: &EnvSnapshot) -> bool {
    env_flag(env, env_keys::SKILLS_ALLOW_REMOTE_INSTALL)
}

/// Resolve the state directory: `$CLAWGUARD_STATE_DIR`, else `~/.clawguard`.
///
/// Falls back to a relative `.clawguard` when no home directory can be
/// resolved (containerized environments without `$HOME`).
pub fn state_dir(env: &EnvSnapshot) -> PathBuf {
    if let Some(dir) = env_nonempty(env, env_keys::STATE_DIR) {
        return PathBuf::from(dir);
    }
    if let Some(home) = env_nonempty(env, "HOME") {
        return PathBuf::from(home).join(".clawguard");
    }
    UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".clawguard"))
        .unwrap_or_else(|| PathBuf::from(".clawguard"))
}

// ── Security config sections ──────────────────────────────────────

/// Top-level security configuration, embedded in the gateway's config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SecurityConfig {
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
}

/// Anomaly-detector thresholds and notification settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnomalyConfig {
    /// Auth failures per source IP within the window before an alert fires.
    #[serde(default = "default_auth_failure_threshold")]
    pub auth_failure_threshold: usize,
    /// Auth-failure sliding window in seconds.
    #[serde(default = "default_auth_failure_window_secs")]
    pub auth_failure_window_secs: u64,
    /// Requests per source IP within the window before an alert fires.
    #[serde(default = "default_request_rate_threshold")]
    pub request_rate_threshold: usize,
    /// Request-rate sliding window in milliseconds.
    #[serde(default = "default_request_rate_window_ms")]
    pub request_rate_window_ms: u64,
    /// Process-wide writes within the window before an alert fires.
    #[serde(default = "default_write_volume_threshold")]
    pub write_volume_threshold: usize,
    /// Write-volume sliding window in seconds.
    #[serde(default = "default_write_volume_window_secs")]
    pub write_volume_window_secs: u64,
    /// Whether high-severity events with a source IP trigger a temporary block.
    #[serde(default)]
    pub enable_ip_blocking: bool,
    /// Temporary block duration in milliseconds.
    #[serde(default = "default_block_duration_ms")]
    pub block_duration_ms: u64,
    /// Optional endpoint POSTed on every emitted event (5 s deadline).
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Cap on distinct source IPs tracked; least-recently-touched evicted.
    #[serde(default = "default_max_tracked_ips")]
    pub max_tracked_ips: usize,
}

fn default_auth_failure_threshold() -> usize {
    10
}
fn default_auth_failure_window_secs() -> u64 {
    60
}
fn default_request_rate_threshold() -> usize {
    100
}
fn default_request_rate_window_ms() -> u64 {
    1_000
}
fn default_write_volume_threshold() -> usize {
    1_000
}
fn default_write_volume_window_secs() -> u64 {
    60
}
fn default_block_duration_ms() -> u64 {
    300_000 // 5 minutes
}
fn default_max_tracked_ips() -> usize {
    10_000
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            auth_failure_threshold: default_auth_failure_threshold(),
            auth_failure_window_secs: default_auth_failure_window_secs(),
            request_rate_threshold: default_request_rate_threshold(),
            request_rate_window_ms: default_request_rate_window_ms(),
            write_volume_threshold: default_write_volume_threshold(),
            write_volume_window_secs: default_write_volume_window_secs(),
            enable_ip_blocking: false,
            block_duration_ms: default_block_duration_ms(),
            webhook_url: None,
            max_tracked_ips: default_max_tracked_ips(),
        }
    }
}

impl AnomalyConfig {
    /// Read the webhook endpoint from the environment when config left it unset.
    pub fn with_env(mut self, env: &EnvSnapshot) -> Self {
        if self.webhook_url.is_none() {
            self.webhook_url = env_nonempty(env, env_keys::SECURITY_WEBHOOK_URL).map(str::to_string);
        }
        self
    }
}

/// Redaction behavior applied to text crossing a log or webhook boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMode {
    /// Pattern-based text masking disabled. Sensitive header and payload
    /// keys are still replaced.
    Off,
    /// Mask tool output, log lines, and webhook payloads (default).
    #[default]
    Tools,
}

/// Redaction engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RedactionConfig {
    #[serde(default)]
    pub mode: RedactionMode,
    /// Custom pattern list. Non-empty replaces the built-in set. Entries may
    /// be wrapped `/…/flags` to carry regex flags; all patterns apply
    /// globally regardless.
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvSnapshot {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    // ── env accessors ────────────────────────────────────────

    #[test]
    fn env_flag_accepts_true_only() {
        let e = env(&[
            ("A", "true"),
            ("B", "TRUE"),
            ("C", "1"),
            ("D", "yes"),
            ("E", ""),
        ]);
        assert!(env_flag(&e, "A"));
        assert!(env_flag(&e, "B"));
        assert!(!env_flag(&e, "C"));
        assert!(!env_flag(&e, "D"));
        assert!(!env_flag(&e, "E"));
        assert!(!env_flag(&e, "MISSING"));
    }

    #[test]
    fn env_nonempty_filters_blank_values() {
        let e = env(&[("A", "value"), ("B", "   "), ("C", "")]);
        assert_eq!(env_nonempty(&e, "A"), Some("value"));
        assert_eq!(env_nonempty(&e, "B"), None);
        assert_eq!(env_nonempty(&e, "C"), None);
        assert_eq!(env_nonempty(&e, "MISSING"), None);
    }

    #[test]
    fn state_dir_prefers_explicit_override() {
        let e = env(&[
            (env_keys::STATE_DIR, "/var/lib/clawguard"),
            ("HOME", "/home/user"),
        ]);
        assert_eq!(state_dir(&e), PathBuf::from("/var/lib/clawguard"));
    }

    #[test]
    fn state_dir_falls_back_to_home() {
        let e = env(&[("HOME", "/home/user")]);
        assert_eq!(state_dir(&e), PathBuf::from("/home/user/.clawguard"));
    }

    #[test]
    fn remote_install_requires_opt_in() {
        assert!(!skills_remote_install_allowed(&env(&[])));
        assert!(skills_remote_install_allowed(&env(&[(
            env_keys::SKILLS_ALLOW_REMOTE_INSTALL,
            "true"
        )])));
    }

    // ── config defaults ──────────────────────────────────────

    #[test]
    fn anomaly_defaults_match_documented_thresholds() {
        let c = AnomalyConfig::default();
        assert_eq!(c.auth_failure_threshold, 10);
        assert_eq!(c.auth_failure_window_secs, 60);
        assert_eq!(c.request_rate_threshold, 100);
        assert_eq!(c.request_rate_window_ms, 1_000);
        assert_eq!(c.write_volume_threshold, 1_000);
        assert_eq!(c.write_volume_window_secs, 60);
        assert_eq!(c.block_duration_ms, 300_000);
        assert!(!c.enable_ip_blocking);
        assert!(c.webhook_url.is_none());
    }

    #[test]
    fn anomaly_config_reads_webhook_from_env() {
        let e = env(&[(env_keys::SECURITY_WEBHOOK_URL, "https://hooks.example/sec")]);
        let c = AnomalyConfig::default().with_env(&e);
        assert_eq!(c.webhook_url.as_deref(), Some("https://hooks.example/sec"));
    }

    #[test]
    fn anomaly_config_env_does_not_override_explicit_webhook() {
        let e = env(&[(env_keys::SECURITY_WEBHOOK_URL, "https://hooks.example/env")]);
        let c = AnomalyConfig {
            webhook_url: Some("https://hooks.example/config".into()),
            ..AnomalyConfig::default()
        }
        .with_env(&e);
        assert_eq!(
            c.webhook_url.as_deref(),
            Some("https://hooks.example/config")
        );
    }

    #[test]
    fn security_config_deserializes_from_empty_object() {
        let c: SecurityConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c.anomaly.auth_failure_threshold, 10);
        assert_eq!(c.redaction.mode, RedactionMode::Tools);
        assert!(c.redaction.patterns.is_empty());
    }

    #[test]
    fn redaction_mode_serde_roundtrip() {
        let json = serde_json::to_string(&RedactionMode::Off).unwrap();
        assert_eq!(json, "\"off\"");
        let parsed: RedactionMode = serde_json::from_str("\"tools\"").unwrap();
        assert_eq!(parsed, RedactionMode::Tools);
    }
}
