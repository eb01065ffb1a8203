//! Arbitration: the allow/deny logic behind a [`SandboxPolicy`].
//!
//! Every checker is a pure function over the policy and the requested
//! operation; [`SandboxPolicy::enforce`] is the fatal wrapper that audits the
//! denial and raises. Subprocess enforcement runs the one-liner blocklist
//! before the policy is even consulted; that check cannot be bypassed by a
//! permissive manifest.

use super::{
    EgressMode, FsMode, SandboxPolicy, ALWAYS_DENIED_COMMANDS, ALWAYS_DENIED_PATHS,
};
use crate::audit::{self, Severity};
use crate::blocklist;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Shell interpreters gated behind `subprocess.shell_access`.
const SHELL_BASENAMES: &[&str] = &["sh", "bash", "zsh", "fish", "cmd", "powershell", "pwsh"];

/// Filesystem operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsOperation {
    Read,
    Write,
    Execute,
}

/// Network operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetOperation {
    Connect,
    Listen,
}

/// A resource access presented to [`SandboxPolicy::enforce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxOperation {
    Filesystem { path: String, op: FsOperation },
    Network { host: String, op: NetOperation },
    Subprocess { command: String, args: Vec<String> },
}

/// Allow/deny result of a sandbox check. Checks never fail; they decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessVerdict {
    Allowed,
    Denied { reason: String },
}

impl AccessVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessVerdict::Allowed)
    }

    fn denied(reason: impl Into<String>) -> Self {
        AccessVerdict::Denied {
            reason: reason.into(),
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn expand_user_path(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Fold `.` and `..` components without touching the filesystem. `..` at the
/// root clamps rather than escaping.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Match a hardcoded denied entry: entries ending in `*` are prefix
/// patterns, the rest match as prefix or substring after `~` expansion.
fn matches_always_denied(path: &Path, entry: &str) -> bool {
    let path_str = path.to_string_lossy();
    if let Some(stem) = entry.strip_suffix('*') {
        let stem = expand_user_path(stem);
        return path_str.starts_with(&*stem.to_string_lossy());
    }
    let expanded = expand_user_path(entry);
    path.starts_with(&expanded) || path_str.contains(&*expanded.to_string_lossy())
}

/// Match a policy denied/allowed entry component-wise after `~` expansion.
fn path_falls_under(path: &Path, entry: &str) -> bool {
    path.starts_with(expand_user_path(entry))
}

/// Lowercase and strip scheme, path, userinfo, and port from a peer name.
fn normalize_host(raw: &str) -> Option<String> {
    let mut host = raw.trim().to_ascii_lowercase();
    if let Some((_, rest)) = host.split_once("://") {
        host = rest.to_string();
    }
    host = host
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_string();
    if let Some((_, after_userinfo)) = host.rsplit_once('@') {
        host = after_userinfo.to_string();
    }
    if let Some((name, _port)) = host.split_once(':') {
        host = name.to_string();
    }
    host = host.trim_end_matches('.').to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Whether `host` matches one egress allowlist entry: exact name, `*.suffix`
/// glob, or sub-domain of a plain entry.
fn host_matches_entry(host: &str, entry: &str) -> bool {
    let entry = entry.trim().to_ascii_lowercase();
    if entry.is_empty() {
        return false;
    }
    if let Some(suffix) = entry.strip_prefix("*.") {
        return host.len() > suffix.len() && host.ends_with(suffix) &&
            host.as_bytes()[host.len() - suffix.len() - 1] == b'.';
    }
    host == entry || host.ends_with(&format!(".{entry}"))
}

impl SandboxPolicy {
    /// Arbitrate a filesystem access.
    pub fn check_fs(&self, path: &str, op: FsOperation) -> AccessVerdict {
        // Resolve to an absolute form; relative paths live in the sandbox.
        let expanded = expand_user_path(path);
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            self.sandbox_dir().join(expanded)
        };
        let absolute = normalize_lexically(&absolute);

        for entry in ALWAYS_DENIED_PATHS {
            if matches_always_denied(&absolute, entry) {
                return AccessVerdict::denied(format!(
                    "path {} is always denied ({entry})",
                    absolute.display()
                ));
            }
        }

        for entry in &self.permissions().filesystem.denied_paths {
            if path_falls_under(&absolute, entry) {
                return AccessVerdict::denied(format!(
                    "path {} is denied by policy ({entry})",
                    absolute.display()
                ));
            }
        }

        let writing = op != FsOperation::Read;
        match self.permissions().filesystem.mode {
            FsMode::Deny => {
                return AccessVerdict::denied("filesystem access is disabled for this skill");
            }
            FsMode::ReadOnly => {
                if writing {
                    return AccessVerdict::denied(format!(
                        "filesystem policy is read-only; {op:?} of {} refused",
                        absolute.display()
                    ));
                }
            }
            FsMode::SandboxOnly => {
                if writing && !absolute.starts_with(self.sandbox_dir()) {
                    return AccessVerdict::denied(format!(
                        "{} is outside the skill sandbox {}",
                        absolute.display(),
                        self.sandbox_dir().display()
                    ));
                }
            }
            FsMode::WorkspaceOnly => match self.workspace_dir() {
                Some(workspace) => {
                    if !absolute.starts_with(workspace) {
                        return AccessVerdict::denied(format!(
                            "{} is outside the workspace {}",
                            absolute.display(),
                            workspace.display()
                        ));
                    }
                }
                None => {
                    return AccessVerdict::denied(
                        "filesystem policy is workspace-only but no workspace root is configured",
                    );
                }
            },
            FsMode::Unrestricted => {}
        }

        let allowed_paths = &self.permissions().filesystem.allowed_paths;
        if writing
            && !allowed_paths.is_empty()
            && !allowed_paths
                .iter()
                .any(|entry| path_falls_under(&absolute, entry))
        {
            return AccessVerdict::denied(format!(
                "{} does not fall under any allowed path",
                absolute.display()
            ));
        }

        AccessVerdict::Allowed
    }

    /// Arbitrate a network access.
    pub fn check_net(&self, hostname: &str, op: NetOperation) -> AccessVerdict {
        let network = &self.permissions().network;
        if op == NetOperation::Listen {
            if network.listen {
                return AccessVerdict::Allowed;
            }
            return AccessVerdict::denied("listening sockets are disabled for this skill");
        }

        match network.egress {
            EgressMode::Deny => AccessVerdict::denied("network egress is disabled for this skill"),
            EgressMode::Unrestricted => AccessVerdict::Allowed,
            EgressMode::Allowlist => {
                let Some(host) = normalize_host(hostname) else {
                    return AccessVerdict::denied(format!("unparseable peer name: {hostname}"));
                };
                if network
                    .egress_allowlist
                    .iter()
                    .any(|entry| host_matches_entry(&host, entry))
                {
                    AccessVerdict::Allowed
                } else {
                    AccessVerdict::denied(format!("{host} is not in the egress allowlist"))
                }
            }
        }
    }

    /// Arbitrate a subprocess spawn.
    pub fn check_subprocess(&self, command: &str, args: &[String]) -> AccessVerdict {
        let full = if args.is_empty() {
            command.to_string()
        } else {
            format!("{command} {}", args.join(" "))
        };

        let outcome = blocklist::check_one_liner(&full);
        if outcome.blocked {
            return AccessVerdict::denied(format!(
                "dangerous command pattern: {}",
                outcome.description.unwrap_or_default()
            ));
        }

        let subprocess = &self.permissions().subprocess;
        if !subprocess.allowed {
            return AccessVerdict::denied("subprocess execution is disabled for this skill");
        }

        for entry in ALWAYS_DENIED_COMMANDS {
            if full.contains(entry) {
                return AccessVerdict::denied(format!("command contains always-denied {entry:?}"));
            }
        }

        let base = command
            .trim()
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(command)
            .to_string();
        let base_lower = base
            .strip_suffix(".exe")
            .unwrap_or(&base)
            .to_ascii_lowercase();

        if SHELL_BASENAMES.contains(&base_lower.as_str()) && !subprocess.shell_access {
            return AccessVerdict::denied(format!(
                "shell access is disabled for this skill ({base})"
            ));
        }

        for entry in &subprocess.denied_commands {
            if &base == entry || command.contains(entry.as_str()) {
                return AccessVerdict::denied(format!("command is denied by policy ({entry})"));
            }
        }

        if !subprocess.allowed_commands.is_empty()
            && !subprocess
                .allowed_commands
                .iter()
                .any(|entry| entry == &base || entry == command)
        {
            return AccessVerdict::denied(format!("{base} is not in the command allowlist"));
        }

        AccessVerdict::Allowed
    }

    /// Fatal dispatcher: audits and raises on any denial.
    ///
    /// Subprocess operations run through the one-liner blocklist's own
    /// enforcement first, so callers that reach the sandbox through any path
    /// still cannot run a blocked one-liner.
    pub fn enforce(&self, operation: &SandboxOperation) -> Result<()> {
        let verdict = match operation {
            SandboxOperation::Filesystem { path, op } => self.check_fs(path, *op),
            SandboxOperation::Network { host, op } => self.check_net(host, *op),
            SandboxOperation::Subprocess { command, args } => {
                let full = if args.is_empty() {
                    command.clone()
                } else {
                    format!("{command} {}", args.join(" "))
                };
                if let Err(err) = blocklist::enforce_one_liner(&full) {
                    self.audit_violation("subprocess", &err.to_string());
                    return Err(err.context(format!(
                        "sandbox violation by skill {}",
                        self.skill_id()
                    )));
                }
                self.check_subprocess(command, args)
            }
        };

        match verdict {
            AccessVerdict::Allowed => Ok(()),
            AccessVerdict::Denied { reason } => {
                let kind = match operation {
                    SandboxOperation::Filesystem { .. } => "filesystem",
                    SandboxOperation::Network { .. } => "network",
                    SandboxOperation::Subprocess { .. } => "subprocess",
                };
                self.audit_violation(kind, &reason);
                bail!("sandbox violation by skill {}: {reason}", self.skill_id());
            }
        }
    }

    fn audit_violation(&self, kind: &str, reason: &str) {
        audit::emit(
            "sandbox_violation",
            Severity::High,
            serde_json::json!({
                "skill_id": self.skill_id(),
                "operation": kind,
                "reason": reason,
            }),
        );
    }
}
