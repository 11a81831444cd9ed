//! Independent re-check of an evidence record against replayed outputs.

use mgp_types::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::SandboxResult;
use crate::evidence::{resource_usage_hash, syscall_trace_hash, SandboxEvidence};
use crate::executor::ResourceUsage;
use crate::manifest::SandboxManifest;
use crate::policy::SandboxPolicy;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub passed: bool,
    /// Evidence fields whose recomputed hash differs.
    pub mismatched: Vec<String>,
}

/// Outputs of a replayed run.
pub struct ReplayObservation<'a> {
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub syscalls: &'a [String],
    pub usage: &'a ResourceUsage,
}

pub fn verify_replay(
    evidence: &SandboxEvidence,
    manifest: &SandboxManifest,
    policy: &SandboxPolicy,
    observed: &ReplayObservation<'_>,
) -> SandboxResult<ReplayReport> {
    let checks = [
        ("manifest_hash", manifest.manifest_hash()?, &evidence.manifest_hash),
        ("policy_hash", policy.policy_hash()?, &evidence.policy_hash),
        (
            "stdout_hash",
            ContentHash::hash(observed.stdout.as_bytes()),
            &evidence.stdout_hash,
        ),
        (
            "stderr_hash",
            ContentHash::hash(observed.stderr.as_bytes()),
            &evidence.stderr_hash,
        ),
        (
            "syscall_trace_hash",
            syscall_trace_hash(observed.syscalls)?,
            &evidence.syscall_trace_hash,
        ),
        (
            "resource_usage_hash",
            resource_usage_hash(observed.usage)?,
            &evidence.resource_usage_hash,
        ),
    ];
    let mut mismatched: Vec<String> = checks
        .into_iter()
        .filter(|(_, recomputed, stored)| recomputed != *stored)
        .map(|(field, _, _)| field.to_string())
        .collect();
    if manifest.replay_seed != evidence.replay_seed {
        mismatched.push("replay_seed".into());
    }
    if !evidence.verify() {
        mismatched.push("evidence_hash".into());
    }
    Ok(ReplayReport {
        passed: mismatched.is_empty(),
        mismatched,
    })
}
