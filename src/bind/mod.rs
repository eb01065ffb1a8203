//! Public-bind guard — the pre-listen admission check.
//!
//! Binding anything but loopback exposes the gateway to the network, so a
//! public bind must clear four gates: explicit opt-in, a parseable non-empty
//! IP allowlist, TLS, and at least one authentication method. A denial
//! carries the full remediation list so the error message teaches the fix
//! instead of just refusing.

use crate::allowlist::IpAllowlist;
use crate::audit::{self, Severity};
use crate::config::{env_flag, env_keys, env_nonempty, EnvSnapshot};
use anyhow::{bail, Result};

/// Everything a bind decision depends on, captured by the caller.
#[derive(Debug, Clone, Default)]
pub struct BindContext {
    pub host: String,
    pub tls_enabled: bool,
    pub has_token: bool,
    pub has_password: bool,
    pub has_tailscale_auth: bool,
    pub env: EnvSnapshot,
}

impl BindContext {
    pub fn new(host: impl Into<String>, env: EnvSnapshot) -> Self {
        Self {
            host: host.into(),
            env,
            ..Self::default()
        }
    }
}

/// Outcome of [`check_bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub remediations: Vec<String>,
}

impl BindDecision {
    fn admit() -> Self {
        Self {
            allowed: true,
            reason: None,
            remediations: Vec::new(),
        }
    }

    fn deny(reason: impl Into<String>, remediations: Vec<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            remediations,
        }
    }
}

/// Classify a bind host. Purely textual and case-insensitive.
///
/// Wildcard hosts (`0.0.0.0`, `::`) are public. Loopback forms are not.
/// The Tailscale CGNAT range `100.64.0.0/10` is treated as semi-private:
/// reachable only over the overlay, so not a public exposure. Everything
/// else, including hostnames, is treated as public.
pub fn is_public_host(host: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(&host);

    match host {
        "0.0.0.0" | "::" => return true,
        "localhost" | "::1" | "0:0:0:0:0:0:0:1" => return false,
        _ => {}
    }

    if host.starts_with("127.") {
        return false;
    }
    if let Some(mapped) = host.strip_prefix("::ffff:") {
        if mapped.starts_with("127.") {
            return false;
        }
    }

    // Tailscale CGNAT: 100.64.0.0/10.
    if let Ok(v4) = host.parse::<std::net::Ipv4Addr>() {
        let octets = v4.octets();
        if octets[0] == 100 && (64..128).contains(&octets[1]) {
            return false;
        }
    }

    true
}

fn loopback_alternatives() -> Vec<String> {
    vec![
        "Bind 127.0.0.1 instead and keep the gateway loopback-only".into(),
        "Reach the gateway remotely over an SSH tunnel: ssh -N -L 8080:127.0.0.1:8080 <host>".into(),
        "Join the machines to a private overlay network (e.g. Tailscale) and bind the overlay address".into(),
    ]
}

/// Apply gates G0–G4 in order. Loopback and overlay binds are admitted
/// unconditionally; a public bind must pass every remaining gate.
pub fn check_bind(ctx: &BindContext) -> BindDecision {
    // G0: non-public hosts need no further scrutiny.
    if !is_public_host(&ctx.host) {
        return BindDecision::admit();
    }

    // G1: explicit opt-in.
    if !env_flag(&ctx.env, env_keys::ALLOW_PUBLIC_BIND) {
        let mut remediations = vec![format!(
            "Set {}=true to opt in to a public bind",
            env_keys::ALLOW_PUBLIC_BIND
        )];
        remediations.extend(loopback_alternatives());
        return BindDecision::deny(
            format!(
                "binding {} exposes the gateway publicly and requires explicit opt-in",
                ctx.host
            ),
            remediations,
        );
    }

    // G2: a parseable, non-empty IP allowlist.
    let allowlist_remediations = || {
        let mut remediations = vec![format!(
            "Set {} to the client IPs/CIDRs allowed to connect (e.g. 203.0.113.10,198.51.100.0/24)",
            env_keys::PUBLIC_BIND_IP_ALLOWLIST
        )];
        remediations.extend(loopback_alternatives());
        remediations
    };
    match env_nonempty(&ctx.env, env_keys::PUBLIC_BIND_IP_ALLOWLIST) {
        None => {
            return BindDecision::deny(
                "public bind requires a client IP allowlist and none is configured",
                allowlist_remediations(),
            );
        }
        Some(raw) => match IpAllowlist::parse(raw) {
            Err(err) => {
                return BindDecision::deny(
                    format!("public bind IP allowlist is malformed: {err}"),
                    allowlist_remediations(),
                );
            }
            Ok(list) if list.is_empty() => {
                return BindDecision::deny(
                    "public bind IP allowlist is empty after trimming",
                    allowlist_remediations(),
                );
            }
            Ok(_) => {}
        },
    }

    // G3: TLS on the listener.
    if !ctx.tls_enabled {
        let mut remediations =
            vec!["Enable TLS on the gateway listener, or terminate TLS in a proxy in front of it"
                .to_string()];
        remediations.extend(loopback_alternatives());
        return BindDecision::deny("public bind requires TLS on the listener", remediations);
    }

    // G4: at least one authentication method. Configured env credentials
    // count even when the caller did not fold them into the flags.
    let has_auth = ctx.has_token
        || ctx.has_password
        || ctx.has_tailscale_auth
        || env_flag(&ctx.env, env_keys::REQUIRE_MTLS)
        || env_nonempty(&ctx.env, env_keys::OIDC_ISSUER).is_some()
        || env_nonempty(&ctx.env, env_keys::GATEWAY_TOKEN).is_some()
        || env_nonempty(&ctx.env, env_keys::GATEWAY_PASSWORD).is_some();
    if !has_auth {
        return BindDecision::deny(
            "public bind requires at least one authentication method",
            vec![
                format!("Set {} or {}", env_keys::GATEWAY_TOKEN, env_keys::GATEWAY_PASSWORD),
                format!("Set {}=true to require client certificates", env_keys::REQUIRE_MTLS),
                format!("Set {} to delegate auth to an OIDC provider", env_keys::OIDC_ISSUER),
                "Authenticate peers through a Tailscale overlay".into(),
            ],
        );
    }

    BindDecision::admit()
}

/// Emit a `public_bind_attempt` audit event for every decision.
pub fn log_bind_attempt(ctx: &BindContext, decision: &BindDecision) {
    let severity = if !decision.allowed {
        Severity::High
    } else if is_public_host(&ctx.host) {
        Severity::Medium
    } else {
        Severity::Low
    };
    audit::emit(
        "public_bind_attempt",
        severity,
        serde_json::json!({
            "host": ctx.host,
            "allowed": decision.allowed,
            "reason": decision.reason,
            "tls_enabled": ctx.tls_enabled,
        }),
    );
}

/// Fatal variant: audits the attempt, prints a console diagnostic, and
/// raises with the reason plus the full remediation list on denial.
pub fn enforce_bind(ctx: &BindContext) -> Result<()> {
    let decision = check_bind(ctx);
    log_bind_attempt(ctx, &decision);
    if decision.allowed {
        return Ok(());
    }

    let reason = decision.reason.clone().unwrap_or_default();
    let fixes = decision
        .remediations
        .iter()
        .map(|r| format!("  • {r}"))
        .collect::<Vec<_>>()
        .join("\n");
    eprintln!(
        "\n━━━━━━━━━━ PUBLIC BIND REFUSED ━━━━━━━━━━\n\
         🛑 Refusing to bind to {} — {reason}.\n\
         Fix one of the following:\n{fixes}\n\
         ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━",
        ctx.host
    );

    bail!(
        "refusing to bind {}: {reason}. Remediations: {}",
        ctx.host,
        decision.remediations.join("; ")
    );
}
