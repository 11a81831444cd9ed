//! Error types for the sandbox boundary
//!
//! Every variant's `Display` is its machine-readable reason code.

use mgp_ledger::LedgerError;

use crate::account::SandboxViolation;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Manifest failed validation; carries the code
    #[error("{0}")]
    InvalidManifest(String),

    /// Policy profile failed validation; carries the code
    #[error("{0}")]
    InvalidPolicy(String),

    /// Static plan analysis found forbidden content
    #[error("sandbox_preflight_violation:{}", .violations.first().map(String::as_str).unwrap_or("unknown"))]
    Preflight { violations: Vec<String> },

    /// The backend cannot enforce a required control
    #[error("sandbox_policy_unenforceable:{0}")]
    Unenforceable(String),

    /// The isolation backend itself failed
    #[error("sandbox_backend_error:{0}")]
    Backend(String),

    /// Observed behaviour broke the policy
    #[error("{0}")]
    Violation(SandboxViolation),

    /// Cancelled before isolation completed
    #[error("sandbox_cancelled")]
    Cancelled,

    /// Evidence could not be recorded
    #[error("sandbox evidence ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("sandbox serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    pub fn code(&self) -> String {
        self.to_string()
    }

    /// True when nothing ran and nothing was recorded.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::InvalidManifest(_)
                | Self::InvalidPolicy(_)
                | Self::Preflight { .. }
                | Self::Unenforceable(_)
                | Self::Backend(_)
                | Self::Cancelled
        )
    }
}

pub type SandboxResult<T> = Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_code_uses_first_violation() {
        let e = SandboxError::Preflight {
            violations: vec!["missing_command".into(), "disallowed_env_key:LD_PRELOAD".into()],
        };
        assert_eq!(e.code(), "sandbox_preflight_violation:missing_command");
        assert!(e.is_pre_execution());
    }

    #[test]
    fn unenforceable_code() {
        let e = SandboxError::Unenforceable("syscall_allowlist".into());
        assert_eq!(e.code(), "sandbox_policy_unenforceable:syscall_allowlist");
    }
}
