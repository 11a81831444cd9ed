use mgp_types::{canonical_bytes, canonical_string, ContentHash};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LedgerResult;

/// One record of the ledger: a payload linked to its predecessor.
///
/// `hash = blake3(hex(prev_hash) ‖ canonical(payload))`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub payload: Value,
    pub prev_hash: ContentHash,
    pub hash: ContentHash,
}

impl LedgerEntry {
    /// Build the entry that follows `prev_hash`.
    pub fn chained(prev_hash: ContentHash, payload: Value) -> LedgerResult<Self> {
        let hash = Self::compute_hash(&prev_hash, &payload)?;
        Ok(Self {
            payload,
            prev_hash,
            hash,
        })
    }

    pub fn compute_hash(prev_hash: &ContentHash, payload: &Value) -> LedgerResult<ContentHash> {
        let mut material = prev_hash.to_hex().into_bytes();
        material.extend_from_slice(&canonical_bytes(payload)?);
        Ok(ContentHash::hash(&material))
    }

    /// Recompute the hash and compare with the stored one.
    pub fn verify_hash(&self) -> bool {
        Self::compute_hash(&self.prev_hash, &self.payload)
            .map(|h| h == self.hash)
            .unwrap_or(false)
    }

    /// The `type` field of the payload, if present.
    pub fn record_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }

    /// One canonical JSON line, without the trailing newline.
    pub fn to_line(&self) -> LedgerResult<String> {
        Ok(canonical_string(self)?)
    }
}
