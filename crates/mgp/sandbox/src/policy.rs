//! Sandbox policy profiles.

use std::path::Path;

use mgp_types::{canonical_bytes, ContentHash};
use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};

/// The `default-v1` profile as shipped.
pub const DEFAULT_PROFILE: &str = include_str!("../profiles/default-v1.json");

/// What a sandboxed run may touch. Lists are kept sorted and deduplicated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub profile_id: String,
    pub syscall_allowlist: Vec<String>,
    pub write_path_allowlist: Vec<String>,
    pub network_egress_allowlist: Vec<String>,
    pub dns_resolution_allowed: bool,
    pub capability_drop: Vec<String>,
    pub cpu_seconds: u64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub timeout_s: u64,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl SandboxPolicy {
    pub fn default_v1() -> Self {
        Self {
            profile_id: "default-v1".into(),
            syscall_allowlist: strings(&[
                "brk", "close", "execve", "exit_group", "fstat", "futex", "lseek", "mmap",
                "munmap", "open", "openat", "read", "rt_sigaction", "stat", "write",
            ]),
            write_path_allowlist: strings(&["reports", "runtime/lifecycle_states"]),
            network_egress_allowlist: Vec::new(),
            dns_resolution_allowed: false,
            capability_drop: strings(&["CAP_NET_ADMIN", "CAP_SYS_ADMIN"]),
            cpu_seconds: 60,
            memory_mb: 1024,
            disk_mb: 2048,
            timeout_s: 60,
        }
    }

    pub fn from_json(text: &str) -> SandboxResult<Self> {
        let mut policy: Self = serde_json::from_str(text)
            .map_err(|e| SandboxError::InvalidPolicy(format!("invalid_policy_document:{e}")))?;
        policy.normalize();
        policy.validate()?;
        Ok(policy)
    }

    pub fn load(path: &Path) -> SandboxResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::InvalidPolicy(format!("invalid_policy_document:{}:{e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn with_syscalls<I, S>(mut self, syscalls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.syscall_allowlist = syscalls.into_iter().map(Into::into).collect();
        self.normalize();
        self
    }

    pub fn with_network_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.network_egress_allowlist = hosts.into_iter().map(Into::into).collect();
        self.normalize();
        self
    }

    fn normalize(&mut self) {
        for list in [
            &mut self.syscall_allowlist,
            &mut self.write_path_allowlist,
            &mut self.network_egress_allowlist,
            &mut self.capability_drop,
        ] {
            list.sort();
            list.dedup();
        }
    }

    /// Shape checks only; an empty syscall allowlist is left for the
    /// isolation backend to refuse.
    pub fn validate(&self) -> SandboxResult<()> {
        if self.profile_id.trim().is_empty() {
            return Err(SandboxError::InvalidPolicy("invalid_policy_profile_id".into()));
        }
        if self.syscall_allowlist.iter().any(|s| s.trim().is_empty()) {
            return Err(SandboxError::InvalidPolicy("invalid_policy_syscall_allowlist".into()));
        }
        if [self.cpu_seconds, self.memory_mb, self.disk_mb, self.timeout_s].contains(&0) {
            return Err(SandboxError::InvalidPolicy("invalid_policy_resource_bounds".into()));
        }
        Ok(())
    }

    pub fn policy_hash(&self) -> SandboxResult<ContentHash> {
        Ok(ContentHash::hash(&canonical_bytes(self)?))
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::default_v1()
    }
}
