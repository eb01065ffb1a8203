//! Anomaly detector — sliding-window counters over auth failures, request
//! rates, and write volume, with optional temporary IP blocking and webhook
//! notification.
//!
//! One instance exists per process. All timestamps are monotonic
//! (`Instant`), never wall-clock, so a clock step cannot flush or extend a
//! window; expired entries are evicted on every access. State updates are
//! serialized behind a mutex so the detector is safe on a multi-threaded
//! runtime, and nothing is ever persisted; counters start cold on restart.

use crate::audit::{self, AuditLevel, Severity};
use crate::config::AnomalyConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Deadline for the anomaly webhook POST.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Anomaly event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    AuthFailureBurst,
    RequestRateSpike,
    AbnormalWriteVolume,
    IdentityManipulation,
    DangerousCommand,
    PublicBindAttempt,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::AuthFailureBurst => "auth_failure_burst",
            AnomalyKind::RequestRateSpike => "request_rate_spike",
            AnomalyKind::AbnormalWriteVolume => "abnormal_write_volume",
            AnomalyKind::IdentityManipulation => "identity_manipulation",
            AnomalyKind::DangerousCommand => "dangerous_command",
            AnomalyKind::PublicBindAttempt => "public_bind_attempt",
        }
    }
}

/// A detected anomaly. `source_ip` is carried raw internally and redacted at
/// every emission boundary.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyEvent {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "sourceIp")]
    pub source_ip: Option<String>,
    pub severity: Severity,
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl AnomalyEvent {
    fn new(
        kind: AnomalyKind,
        severity: Severity,
        source_ip: Option<&str>,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            source_ip: source_ip.map(str::to_string),
            severity,
            details,
        }
    }

    /// Copy with the source IP reduced to its leading group.
    fn redacted(&self) -> Self {
        Self {
            source_ip: self.source_ip.as_deref().map(redact_ip),
            ..self.clone()
        }
    }
}

/// Keep only the coarsest part of an address: the first octet of an IPv4,
/// the first segment of an IPv6.
pub fn redact_ip(ip: &str) -> String {
    let ip = ip.trim();
    if ip.contains(':') {
        let first = ip.split(':').next().unwrap_or_default();
        return format!("{first}::xxxx");
    }
    if ip.matches('.').count() == 3 {
        let first = ip.split('.').next().unwrap_or_default();
        return format!("{first}.xxx.xxx.xxx");
    }
    "xxx".to_string()
}

#[derive(Debug, Default)]
struct DetectorState {
    auth_failures: HashMap<String, VecDeque<Instant>>,
    requests: HashMap<String, VecDeque<Instant>>,
    writes: VecDeque<Instant>,
    /// IP → unblock time.
    blocked: HashMap<String, Instant>,
}

#[derive(Debug)]
struct Inner {
    config: AnomalyConfig,
    state: DetectorState,
}

/// The sliding-window anomaly tracker.
#[derive(Debug)]
pub struct AnomalyDetector {
    inner: Mutex<Inner>,
}

/// The process-wide detector, lazily constructed with defaults.
pub fn global() -> &'static AnomalyDetector {
    static GLOBAL: OnceLock<AnomalyDetector> = OnceLock::new();
    GLOBAL.get_or_init(|| AnomalyDetector::new(AnomalyConfig::default()))
}

/// Reset the process-wide detector with fresh config, dropping all state.
pub fn init(config: AnomalyConfig) {
    global().reset(config);
}

/// Drop timestamps that fell out of the window. An entry exactly at the
/// boundary is still in-window.
fn evict_expired(list: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = list.front() {
        if now.duration_since(*front) > window {
            list.pop_front();
        } else {
            break;
        }
    }
}

/// Bound the tracked-IP maps: drop the key with the stalest latest activity
/// until the cap holds.
fn cap_tracked(map: &mut HashMap<String, VecDeque<Instant>>, max_keys: usize) {
    while map.len() > max_keys.max(1) {
        let stalest = map
            .iter()
            .min_by_key(|(_, list)| list.back().copied().unwrap_or_else(Instant::now))
            .map(|(ip, _)| ip.clone());
        match stalest {
            Some(ip) => {
                map.remove(&ip);
            }
            None => break,
        }
    }
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                state: DetectorState::default(),
            }),
        }
    }

    /// Replace config and drop all state.
    pub fn reset(&self, config: AnomalyConfig) {
        let mut inner = self.inner.lock();
        inner.config = config;
        inner.state = DetectorState::default();
    }

    /// Drop all state, keeping config. For tests.
    pub fn clear(&self) {
        self.inner.lock().state = DetectorState::default();
    }

    pub fn config(&self) -> AnomalyConfig {
        self.inner.lock().config.clone()
    }

    /// Record a failed authentication from `ip`.
    ///
    /// Fires `auth_failure_burst` at high severity when the per-IP count
    /// reaches the threshold within the window, then clears that IP's list
    /// so the next failure starts a fresh burst instead of re-firing.
    pub fn record_auth_failure(&self, ip: &str) -> Option<AnomalyEvent> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let window = Duration::from_secs(inner.config.auth_failure_window_secs);
        let threshold = inner.config.auth_failure_threshold;
        let max_keys = inner.config.max_tracked_ips;

        let list = inner.state.auth_failures.entry(ip.to_string()).or_default();
        evict_expired(list, now, window);
        list.push_back(now);
        let fired = list.len() >= threshold.max(1);
        if fired {
            list.clear();
        }
        cap_tracked(&mut inner.state.auth_failures, max_keys);

        if !fired {
            return None;
        }
        let mut details = serde_json::Map::new();
        details.insert("count".into(), threshold.into());
        details.insert(
            "window_seconds".into(),
            inner.config.auth_failure_window_secs.into(),
        );
        let event = AnomalyEvent::new(
            AnomalyKind::AuthFailureBurst,
            Severity::High,
            Some(ip),
            details,
        );
        self.dispatch_locked(&mut inner, &event);
        Some(event)
    }

    /// Record an inbound request from `ip`.
    ///
    /// Fires `request_rate_spike` at medium severity when the per-IP count
    /// hits the threshold. The list is not cleared: a sustained flood keeps
    /// the window full rather than resetting the evidence.
    pub fn record_request(&self, ip: &str) -> Option<AnomalyEvent> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let window = Duration::from_millis(inner.config.request_rate_window_ms);
        let threshold = inner.config.request_rate_threshold;
        let max_keys = inner.config.max_tracked_ips;

        let list = inner.state.requests.entry(ip.to_string()).or_default();
        evict_expired(list, now, window);
        list.push_back(now);
        let fired = list.len() == threshold.max(1);
        cap_tracked(&mut inner.state.requests, max_keys);

        if !fired {
            return None;
        }
        let mut details = serde_json::Map::new();
        details.insert("count".into(), threshold.into());
        details.insert(
            "window_ms".into(),
            inner.config.request_rate_window_ms.into(),
        );
        let event = AnomalyEvent::new(
            AnomalyKind::RequestRateSpike,
            Severity::Medium,
            Some(ip),
            details,
        );
        self.dispatch_locked(&mut inner, &event);
        Some(event)
    }

    /// Record one write operation (process-wide, no source attribution).
    pub fn record_write(&self) -> Option<AnomalyEvent> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let window = Duration::from_secs(inner.config.write_volume_window_secs);
        let threshold = inner.config.write_volume_threshold;

        evict_expired(&mut inner.state.writes, now, window);
        inner.state.writes.push_back(now);
        if inner.state.writes.len() != threshold.max(1) {
            return None;
        }
        let mut details = serde_json::Map::new();
        details.insert("count".into(), threshold.into());
        details.insert(
            "window_seconds".into(),
            inner.config.write_volume_window_secs.into(),
        );
        let event = AnomalyEvent::new(AnomalyKind::AbnormalWriteVolume, Severity::High, None, details);
        self.dispatch_locked(&mut inner, &event);
        Some(event)
    }

    /// Record a caller-supplied anomaly; the detector stamps the timestamp
    /// and routes it through the normal dispatch path.
    pub fn record_anomaly(
        &self,
        kind: AnomalyKind,
        severity: Severity,
        source_ip: Option<&str>,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> AnomalyEvent {
        let event = AnomalyEvent::new(kind, severity, source_ip, details);
        let mut inner = self.inner.lock();
        self.dispatch_locked(&mut inner, &event);
        event
    }

    /// Whether `ip` is currently blocked. Expired blocks are removed lazily.
    pub fn is_ip_blocked(&self, ip: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.state.blocked.get(ip) {
            Some(unblock_at) if *unblock_at > Instant::now() => true,
            Some(_) => {
                inner.state.blocked.remove(ip);
                false
            }
            None => false,
        }
    }

    /// Event fan-out: warn log + audit line, temporary IP block, webhook.
    /// Runs under the state lock; the webhook leaves as a spawned task.
    fn dispatch_locked(&self, inner: &mut Inner, event: &AnomalyEvent) {
        let redacted = event.redacted();

        tracing::warn!(
            target: "security::anomaly",
            kind = redacted.kind.as_str(),
            source_ip = redacted.source_ip.as_deref().unwrap_or("-"),
            severity = %redacted.severity,
            "anomaly detected"
        );
        if let Ok(fields) = serde_json::to_value(&redacted) {
            audit::emit_at(AuditLevel::Warn, &fields);
        }

        if inner.config.enable_ip_blocking && event.severity >= Severity::High {
            if let Some(ip) = &event.source_ip {
                inner.state.blocked.insert(
                    ip.clone(),
                    Instant::now() + Duration::from_millis(inner.config.block_duration_ms),
                );
            }
        }

        if let Some(url) = inner.config.webhook_url.clone() {
            post_webhook(url, &redacted);
        }
    }
}

/// POST the event to the configured webhook with a 5 s deadline. Failures
/// are logged and swallowed; notification can never flip a decision. Without
/// an async runtime the POST is skipped.
fn post_webhook(url: String, event: &AnomalyEvent) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::debug!(
            target: "security::anomaly",
            "no async runtime available; skipping security webhook"
        );
        return;
    };

    let mut payload = serde_json::json!({ "event": "SECURITY_EVENT" });
    if let (Some(body), Ok(serde_json::Value::Object(fields))) =
        (payload.as_object_mut(), serde_json::to_value(event))
    {
        for (key, value) in fields {
            let value = if key == "details" {
                crate::redact::default_engine().redact_payload_deep(&value)
            } else {
                value
            };
            body.insert(key, value);
        }
    }

    handle.spawn(async move {
        static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
        let client = CLIENT.get_or_init(reqwest::Client::new);
        let result = client
            .post(&url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    target: "security::anomaly",
                    "security webhook returned {}",
                    response.status()
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(target: "security::anomaly", "security webhook failed: {err}");
            }
        }
    });
}
