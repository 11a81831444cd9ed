//! Error types for entropy and budget accounting

use crate::accountant::EntropyCeiling;

#[derive(Debug, thiserror::Error)]
pub enum EntropyError {
    /// A mutation or its epoch went over an entropy ceiling
    #[error("entropy_ceiling_exceeded:{scope}:{bits}>{limit}")]
    CeilingExceeded {
        scope: EntropyCeiling,
        bits: u64,
        limit: u64,
    },

    /// Budget or policy configuration is unusable
    #[error("entropy_config_invalid:{0}")]
    InvalidConfig(String),

    /// Policy could not be hashed
    #[error("entropy policy serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EntropyResult<T> = Result<T, EntropyError>;
