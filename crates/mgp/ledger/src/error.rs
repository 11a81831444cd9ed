use std::path::PathBuf;

/// Errors from the hash-chained ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt ledger record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("invalid range: start {start} is greater than end {end}")]
    InvalidRange { start: usize, end: usize },

    #[error("ledger is held by another writer: {0}")]
    Locked(PathBuf),

    #[error("invalid ledger record: {0}")]
    InvalidRecord(String),

    #[error("chain integrity violation at index {index}: {reason}")]
    IntegrityViolation { index: usize, reason: String },
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_violation_display() {
        let e = LedgerError::IntegrityViolation {
            index: 3,
            reason: "hash_mismatch".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("index 3"));
        assert!(msg.contains("hash_mismatch"));
    }

    #[test]
    fn json_error_converts() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(LedgerError::from(err), LedgerError::Serialization(_)));
    }
}
