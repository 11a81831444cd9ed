#[derive(Debug, thiserror::Error)]
pub enum LawError {
    #[error("invalid semver: {0}")]
    InvalidSemver(String),

    #[error("invalid law manifest: {}", .0.join("; "))]
    InvalidManifest(Vec<String>),

    #[error("law serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type LawResult<T> = Result<T, LawError>;
