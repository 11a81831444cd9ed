//! Per-rule verdicts, the aggregate policy verdict and its governance envelope.

use mgp_types::{canonical_bytes, ContentHash, Severity, Tier};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rule::ValidatorKind;

/// Which validator implementation produced a row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub validator: ValidatorKind,
    pub version: String,
}

impl Provenance {
    pub fn of(kind: ValidatorKind) -> Self {
        Self {
            validator: kind,
            version: kind.version().to_string(),
        }
    }
}

/// Outcome of one enabled rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub rule: String,
    pub severity: Severity,
    pub passed: bool,
    /// False when the rule's applicability excluded this request.
    pub applicable: bool,
    pub reason: String,
    #[serde(default)]
    pub details: Value,
    pub provenance: Provenance,
}

impl RuleVerdict {
    pub fn is_blocking_failure(&self) -> bool {
        !self.passed && self.severity == Severity::Blocking
    }

    pub fn is_warning(&self) -> bool {
        !self.passed && self.severity == Severity::Warning
    }
}

// ── Governance Envelope ─────────────────────────────────────────────────

/// One digest row per evaluated rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRow {
    pub rule: String,
    pub severity: Severity,
    pub passed: bool,
    pub applicable: bool,
    pub reason: String,
    pub details_hash: ContentHash,
    pub provenance_hash: ContentHash,
}

/// Deterministic summary of an evaluation.
///
/// Two evaluations of the same request under the same constitution and
/// inputs produce byte-identical envelopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceEnvelope {
    pub constitution_version: String,
    pub policy_hash: ContentHash,
    pub tier: Tier,
    pub tier_value: u8,
    pub agent_id: String,
    pub epoch_id: String,
    /// Sorted by rule name.
    pub rows: Vec<EnvelopeRow>,
}

impl GovernanceEnvelope {
    pub fn digest(&self) -> Result<ContentHash, serde_json::Error> {
        Ok(ContentHash::hash(&canonical_bytes(self)?))
    }
}

// ── Policy Verdict ──────────────────────────────────────────────────────

/// Aggregate result of evaluating a request against the constitution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub constitution_version: String,
    pub policy_hash: ContentHash,
    pub tier: Tier,
    pub agent_id: String,
    pub epoch_id: String,
    /// True iff `blocking_failures` is empty.
    pub passed: bool,
    /// In evaluation order.
    pub verdicts: Vec<RuleVerdict>,
    pub blocking_failures: Vec<String>,
    pub warnings: Vec<String>,
    pub envelope: GovernanceEnvelope,
    pub envelope_digest: ContentHash,
}

impl PolicyVerdict {
    pub fn verdict_for(&self, rule: &str) -> Option<&RuleVerdict> {
        self.verdicts.iter().find(|v| v.rule == rule)
    }

    /// `policy_violation:<rule>:<reason>` for the first blocking failure.
    pub fn rejection_reason(&self) -> Option<String> {
        self.verdicts
            .iter()
            .find(|v| v.is_blocking_failure())
            .map(|v| format!("policy_violation:{}:{}", v.rule, v.reason))
    }
}

pub(crate) fn hash_value(value: &impl Serialize) -> ContentHash {
    match canonical_bytes(value) {
        Ok(bytes) => ContentHash::hash(&bytes),
        Err(e) => ContentHash::hash(format!("unhashable:{e}").as_bytes()),
    }
}
