//! Error types for policy loading and evaluation

/// Policy errors.
///
/// Every loading failure is fail-closed: no engine is constructed and no
/// default rule set is substituted.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Document declares a different constitution version
    #[error("constitution_version_mismatch:{found}!={expected}")]
    VersionMismatch { found: String, expected: String },

    /// Document is not valid JSON
    #[error("constitution_policy_invalid_json:{0}")]
    InvalidJson(String),

    /// Document violates the constitution schema
    #[error("constitution_policy_invalid_schema:{0}")]
    Schema(String),

    /// Policy file could not be read
    #[error("constitution_policy_missing:{0}")]
    Missing(String),

    /// Evaluation could not produce a verdict digest
    #[error("policy evaluation failed: {0}")]
    EvaluationFailed(String),
}

impl PolicyError {
    pub(crate) fn schema(detail: impl Into<String>) -> Self {
        Self::Schema(detail.into())
    }

    /// Machine-readable reason code.
    pub fn code(&self) -> String {
        self.to_string()
    }
}

/// Result type for policy operations
pub type PolicyResult<T> = Result<T, PolicyError>;
