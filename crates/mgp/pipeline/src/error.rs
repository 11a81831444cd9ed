//! Error types for the governance pipeline

use mgp_entropy::EntropyError;
use mgp_ledger::LedgerError;
use mgp_policy::PolicyError;
use mgp_promotion::PromotionError;
use mgp_sandbox::SandboxError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a mutation was turned away. Recorded with every rejected outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Duplicate `(agent_id, nonce)` within an epoch, a missing signature,
    /// or an epoch that was never begun
    ReplayProtection,
    /// A blocking rule failed
    PolicyViolation,
    /// Per-mutation or per-epoch entropy ceiling
    EntropyCeilingExceeded,
    /// Cost or ROI gate of the mutation budget
    BudgetExceeded,
    /// Manifest, preflight, isolation, accounting or test failure
    SandboxViolation,
    /// No promotion rule matched, or an explicit reject rule did
    PromotionRejected,
    /// The lineage ledger does not verify
    LedgerIntegrityFailure,
    /// Malformed or version-mismatched configuration
    ConfigurationFailure,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReplayProtection => "replay_protection",
            Self::PolicyViolation => "policy_violation",
            Self::EntropyCeilingExceeded => "entropy_ceiling_exceeded",
            Self::BudgetExceeded => "budget_exceeded",
            Self::SandboxViolation => "sandbox_violation",
            Self::PromotionRejected => "promotion_rejected",
            Self::LedgerIntegrityFailure => "ledger_integrity_failure",
            Self::ConfigurationFailure => "configuration_failure",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline errors.
///
/// Rejections are not errors: they come back as a recorded
/// [`PipelineOutcome`](crate::PipelineOutcome). An error means the outcome
/// could not be recorded, or the pipeline could not be built.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline_config_invalid:{0}")]
    Config(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Entropy(#[from] EntropyError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Promotion(#[from] PromotionError),

    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),

    #[error("law_transition_invalid:{}", .0.join("; "))]
    LawTransition(Vec<String>),

    #[error("law: {0}")]
    Law(#[from] mgp_law::LawError),

    /// Epoch lifecycle misuse: `missing_epoch`, `epoch_already_open`,
    /// `epoch_not_started`.
    #[error("{0}")]
    Epoch(String),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("pipeline serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Self::Config(_) | Self::Policy(_) | Self::Law(_) | Self::LawTransition(_) => {
                RejectionKind::ConfigurationFailure
            }
            Self::Epoch(_) => RejectionKind::ReplayProtection,
            Self::Entropy(EntropyError::CeilingExceeded { .. }) => RejectionKind::EntropyCeilingExceeded,
            Self::Entropy(_) => RejectionKind::ConfigurationFailure,
            Self::Sandbox(_) => RejectionKind::SandboxViolation,
            Self::Promotion(_) => RejectionKind::PromotionRejected,
            Self::Ledger(_) | Self::Worker(_) | Self::Serialization(_) => {
                RejectionKind::LedgerIntegrityFailure
            }
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_are_configuration_failures() {
        let e: PipelineError = PolicyError::VersionMismatch {
            found: "0.1.0".into(),
            expected: "0.2.0".into(),
        }
        .into();
        assert_eq!(e.kind(), RejectionKind::ConfigurationFailure);
        assert_eq!(e.to_string(), "constitution_version_mismatch:0.1.0!=0.2.0");
    }

    #[test]
    fn epoch_misuse_is_replay_protection() {
        let e = PipelineError::Epoch("epoch_not_started".into());
        assert_eq!(e.kind(), RejectionKind::ReplayProtection);
        assert_eq!(e.to_string(), "epoch_not_started");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let v = serde_json::to_value(RejectionKind::EntropyCeilingExceeded).unwrap();
        assert_eq!(v, "entropy_ceiling_exceeded");
        assert_eq!(RejectionKind::SandboxViolation.to_string(), "sandbox_violation");
    }
}
