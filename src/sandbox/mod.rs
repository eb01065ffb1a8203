//! Skill sandbox policy engine — the per-skill authorization profile
//! consulted at every filesystem, network, and subprocess decision.
//!
//! A policy is created when a skill is mounted, from hardcoded defaults
//! merged with whatever the skill manifest declares, and is immutable from
//! then on: it can be shared by reference across the skill's lifetime and
//! dropped on unload. Defaults are deny-leaning: read-only filesystem, no
//! egress, no subprocesses, and a handful of paths and commands that no
//! policy can ever re-enable.

mod checks;

use crate::config::env_snapshot_from_process;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use checks::{AccessVerdict, FsOperation, NetOperation, SandboxOperation};

/// Paths no policy can grant access to. Entries ending in `*` are prefix
/// patterns; everything is matched after `~` expansion.
pub const ALWAYS_DENIED_PATHS: &[&str] = &[
    "/etc/shadow",
    "/etc/sudoers",
    "~/.ssh/id_*",
    "~/.gnupg/private*",
];

/// Denied by default but overridable by an explicit policy.
pub const DEFAULT_DENIED_PATHS: &[&str] = &[
    "/etc/passwd",
    "~/.ssh",
    "~/.gnupg",
    "~/.aws",
    "~/.clawguard/credentials",
];

/// Command substrings no policy can re-enable.
pub const ALWAYS_DENIED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "dd if=/dev/zero of=/dev/sda",
    "mkfs",
    ":(){ :|:& };:",
    "chmod -R 777 /",
];

/// Filesystem access mode, most to least restrictive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum FsMode {
    /// No filesystem access at all.
    Deny,
    /// Reads anywhere not denied; no writes or executes.
    #[default]
    ReadOnly,
    /// Writes and executes confined to the skill's sandbox directory.
    SandboxOnly,
    /// All access confined to the caller-supplied workspace root.
    WorkspaceOnly,
    /// No mode gate; denied-path and allowed-path checks still apply.
    Unrestricted,
}

/// Outbound-network posture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EgressMode {
    #[default]
    Deny,
    Allowlist,
    Unrestricted,
}

/// Filesystem sub-policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FilesystemPolicy {
    #[serde(default)]
    pub mode: FsMode,
    /// When non-empty, non-read operations must fall under one of these.
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default = "default_denied_paths")]
    pub denied_paths: Vec<String>,
}

fn default_denied_paths() -> Vec<String> {
    DEFAULT_DENIED_PATHS.iter().map(|p| (*p).to_string()).collect()
}

impl Default for FilesystemPolicy {
    fn default() -> Self {
        Self {
            mode: FsMode::default(),
            allowed_paths: Vec::new(),
            denied_paths: default_denied_paths(),
        }
    }
}

/// Network sub-policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkPolicy {
    #[serde(default)]
    pub egress: EgressMode,
    /// Hostnames or `*.suffix` globs admitted when `egress = allowlist`.
    #[serde(default)]
    pub egress_allowlist: Vec<String>,
    /// Whether the skill may open listening sockets.
    #[serde(default)]
    pub listen: bool,
}

/// Subprocess sub-policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SubprocessPolicy {
    #[serde(default)]
    pub allowed: bool,
    /// When non-empty, the command (or its basename) must equal an entry.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub denied_commands: Vec<String>,
    /// Whether shell interpreters themselves may be spawned.
    #[serde(default)]
    pub shell_access: bool,
}

/// Runtime resource ceilings, enforced by the skill runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeLimits {
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
}

fn default_max_timeout_seconds() -> u64 {
    30
}
fn default_max_memory_mb() -> u64 {
    128
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_timeout_seconds: default_max_timeout_seconds(),
            max_memory_mb: default_max_memory_mb(),
        }
    }
}

/// The four sub-policies a skill runs under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SkillPermissions {
    #[serde(default)]
    pub filesystem: FilesystemPolicy,
    #[serde(default)]
    pub network: NetworkPolicy,
    #[serde(default)]
    pub subprocess: SubprocessPolicy,
    #[serde(default)]
    pub runtime: RuntimeLimits,
}

// ── Manifest overrides ────────────────────────────────────────────
// Skill manifests declare only what they need; every field is optional and
// merges over the hardcoded defaults at policy creation.

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct FilesystemOverride {
    pub mode: Option<FsMode>,
    pub allowed_paths: Option<Vec<String>>,
    pub denied_paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct NetworkOverride {
    pub egress: Option<EgressMode>,
    pub egress_allowlist: Option<Vec<String>>,
    pub listen: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SubprocessOverride {
    pub allowed: Option<bool>,
    pub allowed_commands: Option<Vec<String>>,
    pub denied_commands: Option<Vec<String>>,
    pub shell_access: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RuntimeOverride {
    pub max_timeout_seconds: Option<u64>,
    pub max_memory_mb: Option<u64>,
}

/// All-optional mirror of [`SkillPermissions`], as declared in a manifest.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SkillPermissionsOverride {
    pub filesystem: Option<FilesystemOverride>,
    pub network: Option<NetworkOverride>,
    pub subprocess: Option<SubprocessOverride>,
    pub runtime: Option<RuntimeOverride>,
}

impl SkillPermissions {
    /// Defaults with a manifest override merged on top.
    pub fn merged(overrides: Option<&SkillPermissionsOverride>) -> Self {
        let mut permissions = Self::default();
        let Some(overrides) = overrides else {
            return permissions;
        };

        if let Some(fs) = &overrides.filesystem {
            if let Some(mode) = fs.mode {
                permissions.filesystem.mode = mode;
            }
            if let Some(allowed) = &fs.allowed_paths {
                permissions.filesystem.allowed_paths = allowed.clone();
            }
            if let Some(denied) = &fs.denied_paths {
                permissions.filesystem.denied_paths = denied.clone();
            }
        }
        if let Some(net) = &overrides.network {
            if let Some(egress) = net.egress {
                permissions.network.egress = egress;
            }
            if let Some(allowlist) = &net.egress_allowlist {
                permissions.network.egress_allowlist = allowlist.clone();
            }
            if let Some(listen) = net.listen {
                permissions.network.listen = listen;
            }
        }
        if let Some(sub) = &overrides.subprocess {
            if let Some(allowed) = sub.allowed {
                permissions.subprocess.allowed = allowed;
            }
            if let Some(commands) = &sub.allowed_commands {
                permissions.subprocess.allowed_commands = commands.clone();
            }
            if let Some(commands) = &sub.denied_commands {
                permissions.subprocess.denied_commands = commands.clone();
            }
            if let Some(shell) = sub.shell_access {
                permissions.subprocess.shell_access = shell;
            }
        }
        if let Some(runtime) = &overrides.runtime {
            if let Some(timeout) = runtime.max_timeout_seconds {
                permissions.runtime.max_timeout_seconds = timeout;
            }
            if let Some(memory) = runtime.max_memory_mb {
                permissions.runtime.max_memory_mb = memory;
            }
        }

        permissions
    }
}

/// Inputs to [`SandboxPolicy::create`].
#[derive(Debug, Clone, Default)]
pub struct CreatePolicy {
    pub skill_id: String,
    pub permissions: Option<SkillPermissionsOverride>,
    /// Root under which per-skill sandbox directories live. Defaults to the
    /// gateway state dir.
    pub base_dir: Option<PathBuf>,
    /// Workspace root for `workspace-only` filesystem policies.
    pub workspace_dir: Option<PathBuf>,
}

/// The immutable per-skill authorization profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    skill_id: String,
    sandbox_dir: PathBuf,
    workspace_dir: Option<PathBuf>,
    permissions: SkillPermissions,
}

impl SandboxPolicy {
    /// Build a policy for a skill being mounted.
    pub fn create(params: CreatePolicy) -> Self {
        let base_dir = params
            .base_dir
            .unwrap_or_else(|| crate::config::state_dir(&env_snapshot_from_process()));
        let sandbox_dir = base_dir.join("skill_sandboxes").join(&params.skill_id);
        Self {
            skill_id: params.skill_id,
            sandbox_dir,
            workspace_dir: params.workspace_dir,
            permissions: SkillPermissions::merged(params.permissions.as_ref()),
        }
    }

    pub fn skill_id(&self) -> &str {
        &self.skill_id
    }

    pub fn sandbox_dir(&self) -> &std::path::Path {
        &self.sandbox_dir
    }

    pub fn workspace_dir(&self) -> Option<&std::path::Path> {
        self.workspace_dir.as_deref()
    }

    pub fn permissions(&self) -> &SkillPermissions {
        &self.permissions
    }
}
