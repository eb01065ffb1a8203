//! Identity guard — strips impersonation fields from inbound payloads and
//! resolves which identity a request actually acts as.
//!
//! Inbound request payloads are attacker-controlled JSON. Any field that
//! could make the gateway speak or act as someone else is removed before the
//! payload reaches a handler; a second set of fields is merely observed so
//! unusual-but-legitimate clients stay visible in the audit log.

use crate::audit::{self, AuditLevel, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exact field names removed from every payload.
pub const FORBIDDEN_IDENTITY_FIELDS: &[&str] = &[
    "impersonate",
    "impersonate_as",
    "impersonateAs",
    "post_as",
    "postAs",
    "send_as",
    "sendAs",
    "as_user",
    "asUser",
    "from_user",
    "fromUser",
    "from_id",
    "fromId",
    "actor_id",
    "actorId",
    "override_identity",
    "overrideIdentity",
    "spoof",
    "spoof_as",
];

/// Field names logged when present but left in place.
pub const MONITORED_IDENTITY_FIELDS: &[&str] =
    &["agent_id", "agentId", "display_name", "displayName", "actor"];

/// Maximum mapping depth [`deep_strip`] descends into.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// What [`strip`] did to a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StripResult {
    /// Whether any forbidden field was removed.
    pub sanitized: bool,
    /// Removed field names, in payload order.
    pub stripped_fields: Vec<String>,
    /// Key count of the original payload.
    pub original_field_count: usize,
}

/// Non-mutating forbidden-field scan result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForbiddenScan {
    pub has_forbidden: bool,
    pub fields: Vec<String>,
}

/// Where a resolved identity came from, in trust order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    Session,
    Bot,
    None,
}

/// Outcome of [`validate_source`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityResolution {
    pub valid: bool,
    pub resolved_identity: Option<String>,
    pub source: IdentitySource,
}

fn is_forbidden(key: &str) -> bool {
    FORBIDDEN_IDENTITY_FIELDS.contains(&key)
}

fn is_monitored(key: &str) -> bool {
    MONITORED_IDENTITY_FIELDS.contains(&key)
}

/// Shallow-copy `payload` with every forbidden key removed.
///
/// Unless `silent`, a removal raises an `identity_manipulation` audit event
/// at warn level and monitored fields are noted at debug level. Non-mapping
/// payloads pass through unchanged.
pub fn strip(payload: &Value, silent: bool) -> (Value, StripResult) {
    let Value::Object(map) = payload else {
        return (payload.clone(), StripResult::default());
    };

    let mut output = serde_json::Map::with_capacity(map.len());
    let mut stripped_fields = Vec::new();
    let mut monitored = Vec::new();

    for (key, value) in map {
        if is_forbidden(key) {
            stripped_fields.push(key.clone());
        } else {
            if is_monitored(key) {
                monitored.push(key.clone());
            }
            output.insert(key.clone(), value.clone());
        }
    }

    let result = StripResult {
        sanitized: !stripped_fields.is_empty(),
        stripped_fields,
        original_field_count: map.len(),
    };

    if !silent {
        if result.sanitized {
            audit::emit(
                "identity_manipulation",
                Severity::Medium,
                serde_json::json!({
                    "stripped_fields": result.stripped_fields,
                    "original_field_count": result.original_field_count,
                }),
            );
        }
        if !monitored.is_empty() {
            audit::emit_at(
                AuditLevel::Debug,
                &serde_json::json!({
                    "type": "identity_field_observed",
                    "fields": monitored,
                }),
            );
        }
    }

    (Value::Object(output), result)
}

/// Scan for forbidden keys without touching the payload.
pub fn contains_forbidden(payload: &Value) -> ForbiddenScan {
    let Value::Object(map) = payload else {
        return ForbiddenScan::default();
    };
    let fields: Vec<String> = map.keys().filter(|k| is_forbidden(k)).cloned().collect();
    ForbiddenScan {
        has_forbidden: !fields.is_empty(),
        fields,
    }
}

/// Apply [`strip`] at every mapping level, recursing through sequences and
/// nested mappings down to `max_depth` levels. Atomic values pass through.
pub fn deep_strip(payload: &Value, max_depth: usize) -> Value {
    if max_depth == 0 {
        return payload.clone();
    }
    match payload {
        Value::Object(map) => {
            let mut output = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                if is_forbidden(key) {
                    continue;
                }
                output.insert(key.clone(), deep_strip(value, max_depth - 1));
            }
            Value::Object(output)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| deep_strip(item, max_depth - 1))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve the trusted identity for a request.
///
/// Priority: session identity, then bot identity, then none. A
/// request-supplied `user_id` can never override the session: a mismatch is
/// audited and the session wins. A request identity with no session or bot
/// backing is rejected outright.
pub fn validate_source(
    session_user_id: Option<&str>,
    request_user_id: Option<&str>,
    bot_identity: Option<&str>,
) -> IdentityResolution {
    let session = session_user_id.map(str::trim).filter(|s| !s.is_empty());
    let bot = bot_identity.map(str::trim).filter(|s| !s.is_empty());
    let requested = request_user_id.map(str::trim).filter(|s| !s.is_empty());

    if let Some(session) = session {
        if let Some(requested) = requested {
            if requested != session {
                audit::emit(
                    "identity_manipulation",
                    Severity::Medium,
                    serde_json::json!({
                        "reason": "request user_id disagrees with session identity",
                        "session_user_id": session,
                        "request_user_id": requested,
                    }),
                );
            }
        }
        return IdentityResolution {
            valid: true,
            resolved_identity: Some(session.to_string()),
            source: IdentitySource::Session,
        };
    }

    if let Some(bot) = bot {
        return IdentityResolution {
            valid: true,
            resolved_identity: Some(bot.to_string()),
            source: IdentitySource::Bot,
        };
    }

    if requested.is_some() {
        audit::emit(
            "identity_manipulation",
            Severity::Medium,
            serde_json::json!({
                "reason": "request-supplied identity with no session or bot backing",
            }),
        );
    }

    IdentityResolution {
        valid: false,
        resolved_identity: None,
        source: IdentitySource::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── strip ────────────────────────────────────────────────

    #[test]
    fn strip_removes_forbidden_keeps_rest() {
        let payload = json!({"message": "hi", "impersonate": "admin", "user_id": "u1"});
        let (output, result) = strip(&payload, true);
        assert_eq!(output, json!({"message": "hi", "user_id": "u1"}));
        assert!(result.sanitized);
        assert_eq!(result.stripped_fields, vec!["impersonate"]);
        assert_eq!(result.original_field_count, 3);
    }

    #[test]
    fn strip_matches_exact_names_only() {
        // Case variants that are not in the set stay put.
        let payload = json!({"IMPERSONATE": "x", "impersonation": "y", "as_user": "z"});
        let (output, result) = strip(&payload, true);
        assert_eq!(result.stripped_fields, vec!["as_user"]);
        assert!(output.get("IMPERSONATE").is_some());
        assert!(output.get("impersonation").is_some());
    }

    #[test]
    fn strip_removes_every_forbidden_field() {
        let mut map = serde_json::Map::new();
        for field in FORBIDDEN_IDENTITY_FIELDS {
            map.insert((*field).to_string(), json!("x"));
        }
        map.insert("keep".to_string(), json!(true));
        let (output, result) = strip(&Value::Object(map), true);
        assert_eq!(output, json!({"keep": true}));
        assert_eq!(
            result.stripped_fields.len(),
            FORBIDDEN_IDENTITY_FIELDS.len()
        );
    }

    #[test]
    fn strip_is_idempotent() {
        let payload = json!({"spoof": "a", "postAs": "b", "text": "ok"});
        let (once, first) = strip(&payload, true);
        assert!(first.sanitized);
        let (twice, second) = strip(&once, true);
        assert_eq!(once, twice);
        assert!(second.stripped_fields.is_empty());
        assert!(!second.sanitized);
    }

    #[test]
    fn strip_monitored_fields_stay() {
        let payload = json!({"agent_id": "a1", "displayName": "Robo", "text": "hi"});
        let (output, result) = strip(&payload, true);
        assert_eq!(output, payload);
        assert!(!result.sanitized);
    }

    #[test]
    fn strip_passes_non_object_payloads() {
        for payload in [json!("text"), json!(42), json!([1, 2]), json!(null)] {
            let (output, result) = strip(&payload, true);
            assert_eq!(output, payload);
            assert_eq!(result, StripResult::default());
        }
    }

    #[test]
    fn strip_audits_without_panicking_when_loud() {
        let payload = json!({"impersonate": "admin", "agent_id": "a"});
        let (output, result) = strip(&payload, false);
        assert!(result.sanitized);
        assert!(output.get("impersonate").is_none());
    }

    // ── contains_forbidden ───────────────────────────────────

    #[test]
    fn contains_forbidden_reports_without_mutating() {
        let payload = json!({"impersonate": "x", "fromId": "y", "ok": 1});
        let scan = contains_forbidden(&payload);
        assert!(scan.has_forbidden);
        assert_eq!(scan.fields, vec!["fromId", "impersonate"]);
        // Payload untouched by value semantics; scan found both.
        assert!(payload.get("impersonate").is_some());
    }

    #[test]
    fn contains_forbidden_clean_payload() {
        let scan = contains_forbidden(&json!({"message": "hi"}));
        assert!(!scan.has_forbidden);
        assert!(scan.fields.is_empty());
    }

    // ── deep_strip ───────────────────────────────────────────

    #[test]
    fn deep_strip_reaches_nested_maps_and_sequences() {
        let payload = json!({
            "impersonate": "root",
            "nested": {"send_as": "x", "keep": 1},
            "items": [{"actorId": "y"}, {"fine": true}],
        });
        let stripped = deep_strip(&payload, DEFAULT_MAX_DEPTH);
        assert_eq!(
            stripped,
            json!({
                "nested": {"keep": 1},
                "items": [{}, {"fine": true}],
            })
        );
    }

    #[test]
    fn deep_strip_has_no_forbidden_keys_within_bound() {
        fn assert_clean(value: &Value, depth: usize) {
            if depth == 0 {
                return;
            }
            match value {
                Value::Object(map) => {
                    for (key, child) in map {
                        assert!(
                            !FORBIDDEN_IDENTITY_FIELDS.contains(&key.as_str()),
                            "forbidden key survived: {key}"
                        );
                        assert_clean(child, depth - 1);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        assert_clean(item, depth - 1);
                    }
                }
                _ => {}
            }
        }

        let mut payload = json!({"spoof": "deep"});
        for _ in 0..8 {
            payload = json!({"level": payload, "impersonate": "mid"});
        }
        let stripped = deep_strip(&payload, DEFAULT_MAX_DEPTH);
        assert_clean(&stripped, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn deep_strip_respects_depth_bound() {
        // Nest beyond the bound; the too-deep subtree passes through.
        let mut payload = json!({"impersonate": "deepest"});
        for _ in 0..12 {
            payload = json!({ "level": payload });
        }
        let stripped = deep_strip(&payload, 3);
        let text = serde_json::to_string(&stripped).unwrap();
        assert!(text.contains("impersonate"));
    }

    #[test]
    fn deep_strip_passes_atoms() {
        assert_eq!(deep_strip(&json!(7), DEFAULT_MAX_DEPTH), json!(7));
        assert_eq!(deep_strip(&json!("s"), DEFAULT_MAX_DEPTH), json!("s"));
    }

    // ── validate_source ──────────────────────────────────────

    #[test]
    fn session_identity_wins() {
        let resolution = validate_source(Some("alice"), None, None);
        assert!(resolution.valid);
        assert_eq!(resolution.resolved_identity.as_deref(), Some("alice"));
        assert_eq!(resolution.source, IdentitySource::Session);
    }

    #[test]
    fn session_wins_over_conflicting_request_identity() {
        let resolution = validate_source(Some("alice"), Some("mallory"), Some("bot-1"));
        assert!(resolution.valid);
        assert_eq!(resolution.resolved_identity.as_deref(), Some("alice"));
        assert_eq!(resolution.source, IdentitySource::Session);
    }

    #[test]
    fn bot_identity_used_without_session() {
        let resolution = validate_source(None, None, Some("bot-1"));
        assert!(resolution.valid);
        assert_eq!(resolution.resolved_identity.as_deref(), Some("bot-1"));
        assert_eq!(resolution.source, IdentitySource::Bot);
    }

    #[test]
    fn bare_request_identity_is_rejected() {
        let resolution = validate_source(None, Some("mallory"), None);
        assert!(!resolution.valid);
        assert!(resolution.resolved_identity.is_none());
        assert_eq!(resolution.source, IdentitySource::None);
    }

    #[test]
    fn no_identity_at_all_is_invalid_none() {
        let resolution = validate_source(None, None, None);
        assert!(!resolution.valid);
        assert_eq!(resolution.source, IdentitySource::None);
    }

    #[test]
    fn blank_identities_are_treated_as_absent() {
        let resolution = validate_source(Some("  "), None, Some("bot-1"));
        assert_eq!(resolution.source, IdentitySource::Bot);
    }
}
