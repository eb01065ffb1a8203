#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

//! Security-enforcement core for a personal AI gateway.
//!
//! This crate is the policy decision point (PDP) consulted by the surrounding
//! gateway before every ingress bind, inbound request, skill resource access,
//! and subprocess command. It answers one question at many decision points
//! ("is this action safe, given current configuration and recent behavior?")
//! and emits a structured, redacted audit event for every decision.
//!
//! Subsystems, in dependency order:
//!
//! - [`redact`]: masks secrets in text, headers, and nested payloads.
//! - [`allowlist`]: parses and matches mixed IPv4/IPv6 CIDR lists.
//! - [`blocklist`]: refuses dangerous remote-execution shell one-liners.
//! - [`identity`]: strips impersonation fields and resolves trusted identity.
//! - [`bind`]: gates public `listen()` on opt-in, allowlist, TLS, and auth.
//! - [`sandbox`]: per-skill filesystem/network/subprocess arbitration.
//! - [`anomaly`]: sliding-window counters with IP blocking and webhook alerts.
//! - [`audit`]: best-effort `SECURITY_EVENT:` emission through `tracing`.
//!
//! The surrounding gateway (HTTP server, config loader, skill runtime, CLI)
//! is a caller: it presents an intended action and consumes an approve/deny
//! decision. `check_*` entry points return structured verdicts and never
//! fail; `enforce_*` wrappers turn a denial into a fatal, self-describing
//! error at the call site.

pub mod allowlist;
pub mod anomaly;
pub mod audit;
pub mod bind;
pub mod blocklist;
pub mod config;
pub mod identity;
pub mod redact;
pub mod sandbox;

pub use allowlist::{AllowlistParseError, IpAllowlist};
pub use anomaly::{AnomalyDetector, AnomalyEvent, AnomalyKind};
pub use audit::Severity;
pub use bind::{BindContext, BindDecision};
pub use blocklist::{check_one_liner, enforce_one_liner};
pub use config::{AnomalyConfig, EnvSnapshot, RedactionConfig, SecurityConfig};
pub use identity::{IdentityResolution, IdentitySource};
pub use redact::RedactionEngine;
pub use sandbox::{AccessVerdict, SandboxPolicy, SkillPermissions};
