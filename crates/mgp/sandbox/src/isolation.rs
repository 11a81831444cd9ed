//! Isolation backends.
//!
//! A backend either enforces every required control or refuses; there is no
//! best-effort mode.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};
use crate::manifest::SandboxManifest;
use crate::policy::SandboxPolicy;
use crate::preflight::path_within;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    Process,
    Container,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Process => "process",
            Self::Container => "container",
        })
    }
}

pub const SYSCALL_CONTROL: &str = "syscall_allowlist";
pub const CAPABILITY_CONTROL: &str = "capability_drop";
pub const RESOURCE_CONTROL: &str = "resource_quotas";
pub const WRITE_PATH_CONTROL: &str = "write_path_allowlist";
pub const NETWORK_CONTROL: &str = "network_egress";

/// Syscalls that let a process open a network connection of its own.
const SOCKET_SYSCALLS: [&str; 3] = ["socket", "socketpair", "connect"];

/// One control the backend has committed to enforce.
///
/// `scope` lists what the control covers (syscall names, capability names,
/// writable roots) so the executor applies exactly what was committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcedControl {
    pub control: String,
    pub profile: String,
    pub mechanism: String,
    pub enforced: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
}

impl EnforcedControl {
    fn enforced(control: &str, profile: &str, mechanism: &str) -> Self {
        Self {
            control: control.into(),
            profile: profile.into(),
            mechanism: mechanism.into(),
            enforced: true,
            scope: Vec::new(),
        }
    }

    fn covering(mut self, scope: &[String]) -> Self {
        self.scope = scope.to_vec();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationPlan {
    pub backend: IsolationMode,
    pub controls: Vec<EnforcedControl>,
}

impl IsolationPlan {
    pub fn all_enforced(&self) -> bool {
        !self.controls.is_empty() && self.controls.iter().all(|c| c.enforced)
    }

    pub fn control(&self, name: &str) -> Option<&EnforcedControl> {
        self.controls.iter().find(|c| c.control == name)
    }

    /// First control nobody is enforcing, for the refusal code.
    pub fn first_unenforced(&self) -> Option<&str> {
        self.controls
            .iter()
            .find(|c| !c.enforced)
            .map(|c| c.control.as_str())
    }
}

pub trait IsolationBackend: Send + Sync {
    fn mode(&self) -> IsolationMode;

    /// Commit to enforcing `policy` for `manifest`, or refuse.
    fn prepare(&self, manifest: &SandboxManifest, policy: &SandboxPolicy) -> SandboxResult<IsolationPlan>;
}

fn require(condition: bool, control: &str) -> SandboxResult<()> {
    if condition {
        Ok(())
    } else {
        Err(SandboxError::Unenforceable(control.to_string()))
    }
}

fn bounded(manifest: &SandboxManifest) -> bool {
    ![manifest.cpu_seconds, manifest.memory_mb, manifest.disk_mb, manifest.timeout_s].contains(&0)
}

/// Manifest write paths the policy also allows; these become the only
/// writable roots.
fn writable_roots(manifest: &SandboxManifest, policy: &SandboxPolicy) -> Vec<String> {
    manifest
        .allowed_write_paths
        .iter()
        .filter(|p| path_within(p, &policy.write_path_allowlist))
        .cloned()
        .collect()
}

/// Ephemeral-process backend: seccomp allowlist, capability drop, rlimits,
/// Landlock write roots, and no sockets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIsolationBackend {
    pub seccomp_profile: String,
    pub capability_profile: String,
    pub resource_profile: String,
    pub filesystem_profile: String,
    pub supports_resource_quotas: bool,
}

impl Default for ProcessIsolationBackend {
    fn default() -> Self {
        Self {
            seccomp_profile: "seccomp.default.v1".into(),
            capability_profile: "caps.drop.default.v1".into(),
            resource_profile: "rlimit.default.v1".into(),
            filesystem_profile: "landlock.write.v1".into(),
            supports_resource_quotas: true,
        }
    }
}

impl IsolationBackend for ProcessIsolationBackend {
    fn mode(&self) -> IsolationMode {
        IsolationMode::Process
    }

    fn prepare(&self, manifest: &SandboxManifest, policy: &SandboxPolicy) -> SandboxResult<IsolationPlan> {
        require(
            !policy.syscall_allowlist.is_empty() && !self.seccomp_profile.is_empty(),
            SYSCALL_CONTROL,
        )?;
        require(
            !policy.capability_drop.is_empty() && !self.capability_profile.is_empty(),
            CAPABILITY_CONTROL,
        )?;
        require(
            self.supports_resource_quotas && bounded(manifest),
            RESOURCE_CONTROL,
        )?;
        require(!self.filesystem_profile.is_empty(), WRITE_PATH_CONTROL)?;
        // A process sandbox can forbid sockets outright but cannot filter
        // them by host.
        let opens_sockets = policy
            .syscall_allowlist
            .iter()
            .any(|s| SOCKET_SYSCALLS.contains(&s.as_str()));
        require(!opens_sockets, NETWORK_CONTROL)?;

        Ok(IsolationPlan {
            backend: IsolationMode::Process,
            controls: vec![
                EnforcedControl::enforced(SYSCALL_CONTROL, &self.seccomp_profile, "seccomp")
                    .covering(&policy.syscall_allowlist),
                EnforcedControl::enforced(
                    CAPABILITY_CONTROL,
                    &self.capability_profile,
                    "process_capability_drop",
                )
                .covering(&policy.capability_drop),
                EnforcedControl::enforced(RESOURCE_CONTROL, &self.resource_profile, "process_rlimit"),
                EnforcedControl::enforced(WRITE_PATH_CONTROL, &self.filesystem_profile, "landlock")
                    .covering(&writable_roots(manifest, policy)),
                // The syscall filter is what keeps sockets closed.
                EnforcedControl::enforced(NETWORK_CONTROL, &self.seccomp_profile, "seccomp_no_socket")
                    .covering(&policy.syscall_allowlist),
            ],
        })
    }
}

/// Container backend; refuses unless a runtime profile is configured.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIsolationBackend {
    pub runtime_profile: Option<String>,
}

impl ContainerIsolationBackend {
    pub fn with_runtime_profile(profile: impl Into<String>) -> Self {
        Self {
            runtime_profile: Some(profile.into()),
        }
    }
}

impl IsolationBackend for ContainerIsolationBackend {
    fn mode(&self) -> IsolationMode {
        IsolationMode::Container
    }

    fn prepare(&self, manifest: &SandboxManifest, policy: &SandboxPolicy) -> SandboxResult<IsolationPlan> {
        let profile = match self.runtime_profile.as_deref() {
            Some(p) if !p.trim().is_empty() => p,
            _ => return Err(SandboxError::Unenforceable("container_runtime".into())),
        };
        require(!policy.syscall_allowlist.is_empty(), SYSCALL_CONTROL)?;
        require(!policy.capability_drop.is_empty(), CAPABILITY_CONTROL)?;
        require(bounded(manifest), RESOURCE_CONTROL)?;
        Ok(IsolationPlan {
            backend: IsolationMode::Container,
            controls: vec![
                EnforcedControl::enforced(SYSCALL_CONTROL, profile, "container_seccomp")
                    .covering(&policy.syscall_allowlist),
                EnforcedControl::enforced(CAPABILITY_CONTROL, profile, "container_cap_drop")
                    .covering(&policy.capability_drop),
                EnforcedControl::enforced(RESOURCE_CONTROL, profile, "container_cgroup"),
                EnforcedControl::enforced(
                    NETWORK_CONTROL,
                    profile,
                    if policy.network_egress_allowlist.is_empty() {
                        "container_network_none"
                    } else {
                        "container_network_allowlist"
                    },
                ),
            ],
        })
    }
}
