//! Post-run accounting of observed behaviour against the policy.
//!
//! A run that exited cleanly still fails here if it touched anything outside
//! its allowlists or exceeded a bound.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::executor::{ExecutionReport, FilterVerdict};
use crate::manifest::SandboxManifest;
use crate::policy::SandboxPolicy;
use crate::preflight::path_within;

/// Denied item reported when the kernel filter killed the run; the filter
/// does not say which syscall it was.
pub const FILTERED_SYSCALL: &str = "seccomp_filtered";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "denied", rename_all = "snake_case")]
pub enum SandboxViolation {
    TelemetryMissing,
    Syscall(Vec<String>),
    WritePath(Vec<String>),
    Network(Vec<String>),
    ResourceQuota(Vec<String>),
}

impl SandboxViolation {
    pub fn denied_items(&self) -> &[String] {
        match self {
            Self::TelemetryMissing => &[],
            Self::Syscall(items)
            | Self::WritePath(items)
            | Self::Network(items)
            | Self::ResourceQuota(items) => items,
        }
    }
}

impl fmt::Display for SandboxViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (code, items) = match self {
            Self::TelemetryMissing => return f.write_str("sandbox_syscall_telemetry_missing"),
            Self::Syscall(items) => ("sandbox_syscall_violation", items),
            Self::WritePath(items) => ("sandbox_write_path_violation", items),
            Self::Network(items) => ("sandbox_network_violation", items),
            Self::ResourceQuota(items) => ("sandbox_resource_quota_violation", items),
        };
        write!(f, "{code}:{}", items.join(","))
    }
}

fn sorted_unique<'a>(items: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    items
        .into_iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// An empty trace means the run was not observed, which is not the same as
/// clean.
pub fn enforce_syscall_allowlist(
    observed: &[String],
    allowlist: &[String],
) -> Result<(), SandboxViolation> {
    if observed.is_empty() {
        return Err(SandboxViolation::TelemetryMissing);
    }
    let denied = sorted_unique(observed.iter().filter(|s| !allowlist.contains(s)));
    if denied.is_empty() {
        Ok(())
    } else {
        Err(SandboxViolation::Syscall(denied))
    }
}

pub fn enforce_write_path_allowlist(
    attempted: &[String],
    allowlist: &[String],
) -> Result<(), SandboxViolation> {
    let denied = sorted_unique(attempted.iter().filter(|p| !path_within(p, allowlist)));
    if denied.is_empty() {
        Ok(())
    } else {
        Err(SandboxViolation::WritePath(denied))
    }
}

pub fn enforce_network_egress_allowlist(
    attempted: &[String],
    allowlist: &[String],
) -> Result<(), SandboxViolation> {
    let denied = sorted_unique(attempted.iter().filter(|h| !allowlist.contains(h)));
    if denied.is_empty() {
        Ok(())
    } else {
        Err(SandboxViolation::Network(denied))
    }
}

/// Usage compared against the manifest bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceVerdict {
    pub passed: bool,
    pub exceeded: Vec<String>,
}

pub fn enforce_resource_quotas(report: &ExecutionReport, manifest: &SandboxManifest) -> ResourceVerdict {
    let usage = &report.usage;
    let mut exceeded = Vec::new();
    if usage.cpu_s > manifest.cpu_seconds as f64 {
        exceeded.push("cpu".to_string());
    }
    if usage.memory_mb > manifest.memory_mb as f64 {
        exceeded.push("memory".to_string());
    }
    if usage.disk_mb > manifest.disk_mb as f64 {
        exceeded.push("disk".to_string());
    }
    if usage.wall_s > manifest.timeout_s as f64 {
        exceeded.push("timeout".to_string());
    }
    ResourceVerdict {
        passed: exceeded.is_empty(),
        exceeded,
    }
}

/// Runs every accounting check; the first violation wins in the order
/// syscalls, write paths, network, resources.
pub fn account(
    report: &ExecutionReport,
    manifest: &SandboxManifest,
    policy: &SandboxPolicy,
) -> Result<ResourceVerdict, SandboxViolation> {
    match report.syscall_filter {
        Some(FilterVerdict::Held) => {}
        Some(FilterVerdict::Tripped) => {
            return Err(SandboxViolation::Syscall(vec![FILTERED_SYSCALL.to_string()]))
        }
        None => enforce_syscall_allowlist(&report.observed_syscalls, &policy.syscall_allowlist)?,
    }
    enforce_write_path_allowlist(&report.attempted_write_paths, &manifest.allowed_write_paths)?;
    enforce_write_path_allowlist(&report.attempted_write_paths, &policy.write_path_allowlist)?;
    enforce_network_egress_allowlist(
        &report.attempted_network_hosts,
        &manifest.allowed_network_hosts,
    )?;
    enforce_network_egress_allowlist(
        &report.attempted_network_hosts,
        &policy.network_egress_allowlist,
    )?;
    let resources = enforce_resource_quotas(report, manifest);
    if resources.passed {
        Ok(resources)
    } else {
        Err(SandboxViolation::ResourceQuota(resources.exceeded))
    }
}
