//! Audit sink — best-effort emission of redacted security events.
//!
//! Every decision the core makes flows through here. Events are deep-redacted
//! before they reach the logging subsystem, serialized as one JSON object
//! behind the `SECURITY_EVENT:` prefix so log shippers can pick them out of
//! ordinary diagnostics. Emission never fails and never panics.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Event severity, ordered least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// The logger level an event of this severity is written at.
    pub fn audit_level(self) -> AuditLevel {
        match self {
            Severity::Low => AuditLevel::Info,
            Severity::Medium | Severity::High => AuditLevel::Warn,
            Severity::Critical => AuditLevel::Error,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logger level an audit line is written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Emit a security event with the standard field shape.
pub fn emit(event_type: &str, severity: Severity, details: serde_json::Value) {
    let fields = serde_json::json!({
        "type": event_type,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "severity": severity,
        "details": details,
    });
    emit_at(severity.audit_level(), &fields);
}

/// Emit pre-assembled event fields at an explicit level. The fields are
/// deep-redacted before serialization.
pub fn emit_at(level: AuditLevel, fields: &serde_json::Value) {
    let redacted = crate::redact::default_engine().redact_payload_deep(fields);
    let json = match serde_json::to_string(&redacted) {
        Ok(json) => json,
        Err(err) => {
            tracing::debug!(target: "security::audit", "failed to serialize audit event: {err}");
            return;
        }
    };
    match level {
        AuditLevel::Debug => {
            tracing::debug!(target: "security::audit", "SECURITY_EVENT: {json}");
        }
        AuditLevel::Info => {
            tracing::info!(target: "security::audit", "SECURITY_EVENT: {json}");
        }
        AuditLevel::Warn => {
            tracing::warn!(target: "security::audit", "SECURITY_EVENT: {json}");
        }
        AuditLevel::Error => {
            tracing::error!(target: "security::audit", "SECURITY_EVENT: {json}");
        }
    }
}
