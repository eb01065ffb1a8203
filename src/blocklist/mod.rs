//! One-liner command blocklist — refuses dangerous remote-execution shell
//! idioms before anything else gets a say.
//!
//! The table is deliberately syntactic: it matches the textual shape of
//! supply-chain one-liners (`curl … | sh`, `iwr … | iex`, `bash <(curl …)`)
//! rather than attempting shell semantics. Two tiers: `blocked` patterns hard
//! deny, `suspicious` patterns only raise an audit event. Within a tier the
//! table order is the evaluation order and the first match wins.

use crate::audit::{self, Severity};
use anyhow::{bail, Result};
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

/// Classification tier for a command pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternTier {
    /// Hard denial.
    Blocked,
    /// Audit-only warning.
    Suspicious,
}

struct CommandPattern {
    regex: Regex,
    description: &'static str,
    tier: PatternTier,
}

/// Outcome of the blocked-tier check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub blocked: bool,
    pub description: Option<String>,
}

/// Outcome of the suspicious-tier check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspicionOutcome {
    pub suspicious: bool,
    pub description: Option<String>,
}

const BLOCKED_PATTERNS: &[(&str, &str)] = &[
    (
        r"\bcurl\b[^|]*\|\s*(?:sudo\s+)?(?:sh|bash|zsh)\b",
        "curl output piped into a shell",
    ),
    (
        r"\bwget\b[^|]*\|\s*(?:sudo\s+)?(?:sh|bash|zsh)\b",
        "wget output piped into a shell",
    ),
    (
        r"\b(?:sh|bash|zsh|source)\s+<\(\s*(?:curl|wget)\b",
        "shell executing a process-substituted download",
    ),
    (
        r#"\beval\s+["']?\$\(\s*(?:curl|wget)\b"#,
        "eval over a downloaded command substitution",
    ),
    (
        r"\b(?:iwr|invoke-webrequest)\b[^|]*\|\s*(?:iex|invoke-expression)\b",
        "PowerShell web request piped into Invoke-Expression",
    ),
    (
        r"net\.webclient\b.*downloadstring.*\|\s*(?:iex|invoke-expression)\b",
        "PowerShell WebClient download piped into Invoke-Expression",
    ),
    (
        r"\birm\b[^|]*\|\s*iex\b",
        "PowerShell Invoke-RestMethod piped into iex",
    ),
    (
        r"\bpython[0-9.]*\s+-c\b.*import\s+(?:urllib|requests)\b.*\bexec\b",
        "python -c downloading and exec-ing code",
    ),
    (
        r"\bpython[0-9.]*\s+-c\b.*import\s+os\b.*\bsystem\s*\(",
        "python -c shelling out via os.system",
    ),
    (
        r#"\bnode\s+(?:-e|--eval)\b.*require\s*\(\s*['"]https?['"]\s*\).*\beval\s*\("#,
        "node --eval fetching and eval-ing code",
    ),
    (
        r#"\bruby\s+-e\b.*\bopen\s*\(\s*['"]https?:"#,
        "ruby -e opening a remote URL",
    ),
    (
        r"\bperl\s+-e\b.*\blwp::simple\b.*\beval\b",
        "perl -e fetching via LWP and eval-ing",
    ),
];

const SUSPICIOUS_PATTERNS: &[(&str, &str)] = &[
    (
        r"\bcurl\b[^|]*\|\s*tar\b",
        "remote archive piped straight into tar",
    ),
    (
        r"\bwget\b[^|]*\|\s*tar\b",
        "remote archive piped straight into tar",
    ),
    (
        r"\bnpm\s+install\s+(?:-g|--global)\s+https?://",
        "global npm install from a raw URL",
    ),
];

fn pattern_table() -> &'static [CommandPattern] {
    static TABLE: OnceLock<Vec<CommandPattern>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let compile = |&(src, description): &(&'static str, &'static str), tier| CommandPattern {
            regex: RegexBuilder::new(src)
                .case_insensitive(true)
                .build()
                .expect("blocklist pattern must compile"),
            description,
            tier,
        };
        BLOCKED_PATTERNS
            .iter()
            .map(|entry| compile(entry, PatternTier::Blocked))
            .chain(
                SUSPICIOUS_PATTERNS
                    .iter()
                    .map(|entry| compile(entry, PatternTier::Suspicious)),
            )
            .collect()
    })
}

/// Collapse runs of whitespace to single spaces and trim.
fn normalize_command(cmd: &str) -> String {
    cmd.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_match(cmd: &str, tier: PatternTier) -> Option<&'static str> {
    let normalized = normalize_command(cmd);
    pattern_table()
        .iter()
        .filter(|p| p.tier == tier)
        .find(|p| p.regex.is_match(&normalized))
        .map(|p| p.description)
}

/// Classify a command against the blocked tier.
pub fn check_one_liner(cmd: &str) -> CheckOutcome {
    match first_match(cmd, PatternTier::Blocked) {
        Some(description) => CheckOutcome {
            blocked: true,
            description: Some(description.to_string()),
        },
        None => CheckOutcome {
            blocked: false,
            description: None,
        },
    }
}

/// Classify a command against the suspicious (audit-only) tier.
pub fn suspicious_one_liner(cmd: &str) -> SuspicionOutcome {
    match first_match(cmd, PatternTier::Suspicious) {
        Some(description) => SuspicionOutcome {
            suspicious: true,
            description: Some(description.to_string()),
        },
        None => SuspicionOutcome {
            suspicious: false,
            description: None,
        },
    }
}

/// Fatal variant: raises on a blocked pattern and audits both tiers.
///
/// This check is un-bypassable by policy: a skill with subprocess access
/// still cannot run `curl | sh`. Callers invoke it before any sandbox
/// subprocess arbitration.
pub fn enforce_one_liner(cmd: &str) -> Result<()> {
    let outcome = check_one_liner(cmd);
    if outcome.blocked {
        let description = outcome.description.unwrap_or_default();
        audit::emit(
            "dangerous_command",
            Severity::High,
            serde_json::json!({ "command": cmd, "pattern": description }),
        );
        bail!("Blocked dangerous command pattern: {description}");
    }

    let suspicion = suspicious_one_liner(cmd);
    if suspicion.suspicious {
        audit::emit(
            "dangerous_command",
            Severity::Low,
            serde_json::json!({
                "command": cmd,
                "pattern": suspicion.description,
                "action": "warn",
            }),
        );
    }

    Ok(())
}
