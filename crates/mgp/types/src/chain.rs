use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Result of verifying a hash chain from its first entry.
///
/// `first_broken_index` invalidates that entry and every entry after it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStatus {
    pub ok: bool,
    pub entries: usize,
    pub first_broken_index: Option<usize>,
    pub head_hash: ContentHash,
    pub reason: Option<String>,
}

impl ChainStatus {
    pub fn intact(entries: usize, head_hash: ContentHash) -> Self {
        Self {
            ok: true,
            entries,
            first_broken_index: None,
            head_hash,
            reason: None,
        }
    }

    pub fn broken(
        entries: usize,
        index: usize,
        head_hash: ContentHash,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            ok: false,
            entries,
            first_broken_index: Some(index),
            head_hash,
            reason: Some(reason.into()),
        }
    }

    /// Number of entries that can still be trusted.
    pub fn trusted_entries(&self) -> usize {
        self.first_broken_index.unwrap_or(self.entries)
    }
}
