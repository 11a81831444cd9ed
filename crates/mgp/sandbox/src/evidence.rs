//! Sandbox evidence records and their chain.

use mgp_ledger::LedgerEntry;
use mgp_types::{canonical_bytes, ContentHash};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SandboxResult;
use crate::executor::{ResourceUsage, RunStatus};
use crate::manifest::{ReplaySeed, SandboxManifest};

/// Ledger `type` of an evidence record.
pub const EVIDENCE_RECORD_TYPE: &str = "sandbox_evidence";

/// Hash of the sorted, de-duplicated syscall trace.
pub fn syscall_trace_hash(syscalls: &[String]) -> SandboxResult<ContentHash> {
    let mut trace: Vec<&str> = syscalls.iter().map(String::as_str).collect();
    trace.sort_unstable();
    trace.dedup();
    Ok(ContentHash::hash(&canonical_bytes(&trace)?))
}

pub fn resource_usage_hash(usage: &ResourceUsage) -> SandboxResult<ContentHash> {
    Ok(ContentHash::hash(&canonical_bytes(&usage.rounded())?))
}

/// Immutable record of one sandbox attempt.
///
/// `evidence_hash` covers every other field, including the link to the
/// previous evidence record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SandboxEvidence {
    pub manifest_hash: ContentHash,
    pub policy_hash: ContentHash,
    pub stdout_hash: ContentHash,
    pub stderr_hash: ContentHash,
    pub syscall_trace_hash: ContentHash,
    pub resource_usage_hash: ContentHash,
    pub resource_usage: ResourceUsage,
    pub exit_code: Option<i32>,
    pub replay_seed: ReplaySeed,
    pub status: RunStatus,
    pub attempt: u32,
    pub violation: Option<String>,
    pub prev_evidence_hash: ContentHash,
    pub manifest: SandboxManifest,
    pub evidence_hash: ContentHash,
}

/// Inputs of one attempt, borrowed from the enforcer.
pub struct EvidenceInput<'a> {
    pub manifest: &'a SandboxManifest,
    pub policy_hash: ContentHash,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub syscalls: &'a [String],
    pub usage: &'a ResourceUsage,
    pub exit_code: Option<i32>,
    pub status: RunStatus,
    pub attempt: u32,
    pub violation: Option<String>,
}

impl SandboxEvidence {
    pub fn build(input: EvidenceInput<'_>, prev_evidence_hash: ContentHash) -> SandboxResult<Self> {
        let mut evidence = Self {
            manifest_hash: input.manifest.manifest_hash()?,
            policy_hash: input.policy_hash,
            stdout_hash: ContentHash::hash(input.stdout.as_bytes()),
            stderr_hash: ContentHash::hash(input.stderr.as_bytes()),
            syscall_trace_hash: syscall_trace_hash(input.syscalls)?,
            resource_usage_hash: resource_usage_hash(input.usage)?,
            resource_usage: input.usage.rounded(),
            exit_code: input.exit_code,
            replay_seed: input.manifest.replay_seed.clone(),
            status: input.status,
            attempt: input.attempt,
            violation: input.violation,
            prev_evidence_hash,
            manifest: input.manifest.clone(),
            evidence_hash: ContentHash::zero(),
        };
        evidence.evidence_hash = evidence.compute_hash()?;
        Ok(evidence)
    }

    pub fn compute_hash(&self) -> SandboxResult<ContentHash> {
        let mut body = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut body {
            map.remove("evidence_hash");
        }
        Ok(ContentHash::hash(&canonical_bytes(&body)?))
    }

    /// Recomputes the digest and checks the manifest hash.
    pub fn verify(&self) -> bool {
        let manifest_ok = self
            .manifest
            .manifest_hash()
            .map(|h| h == self.manifest_hash)
            .unwrap_or(false);
        let hash_ok = self
            .compute_hash()
            .map(|h| h == self.evidence_hash)
            .unwrap_or(false);
        manifest_ok && hash_ok
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Ok && self.violation.is_none()
    }

    /// Ledger payload with the record type attached.
    pub fn to_record(&self) -> SandboxResult<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("type".into(), Value::String(EVIDENCE_RECORD_TYPE.into()));
        }
        Ok(value)
    }

    pub fn from_entry(entry: &LedgerEntry) -> SandboxResult<Self> {
        Ok(serde_json::from_value(entry.payload.clone())?)
    }
}

/// Walks evidence records in ledger order and checks each digest and link.
/// Returns the index of the first bad record.
pub fn verify_evidence_chain(entries: &[LedgerEntry]) -> Result<(), usize> {
    let mut prev = ContentHash::zero();
    for (index, entry) in entries
        .iter()
        .filter(|e| e.record_type() == Some(EVIDENCE_RECORD_TYPE))
        .enumerate()
    {
        let Ok(evidence) = SandboxEvidence::from_entry(entry) else {
            return Err(index);
        };
        if !evidence.verify() || evidence.prev_evidence_hash != prev {
            return Err(index);
        }
        prev = evidence.evidence_hash;
    }
    Ok(())
}
