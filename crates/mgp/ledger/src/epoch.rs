//! Per-epoch digest chain.
//!
//! Bundle records carry `bundle_digest`, the hash of the record without its
//! digest fields, and `epoch_digest = blake3(hex(previous) ‖ hex(bundle))`,
//! starting from the zero hash. Replaying the bundles from their content
//! alone must land on the last digest recorded for the epoch.

use mgp_types::ContentHash;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::LedgerEntry;
use crate::error::LedgerResult;

pub const BUNDLE_DIGEST_FIELD: &str = "bundle_digest";
pub const EPOCH_DIGEST_FIELD: &str = "epoch_digest";

/// Result of replaying one epoch's digest chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochReplay {
    pub epoch_id: String,
    pub bundles: usize,
    /// Last digest the ledger recorded; `None` for an epoch with no bundles.
    pub expected: Option<ContentHash>,
    pub replayed: ContentHash,
    pub passed: bool,
}

/// Hash of a bundle record with its digest fields stripped.
pub fn bundle_digest(record: &Value) -> LedgerResult<ContentHash> {
    let mut material = record.clone();
    if let Value::Object(map) = &mut material {
        map.remove(BUNDLE_DIGEST_FIELD);
        map.remove(EPOCH_DIGEST_FIELD);
    }
    Ok(ContentHash::of_canonical(&material)?)
}

pub fn chain_epoch_digest(previous: &ContentHash, bundle: &ContentHash) -> ContentHash {
    ContentHash::hash(format!("{}{}", previous.to_hex(), bundle.to_hex()).as_bytes())
}

pub(crate) fn entry_epoch(entry: &LedgerEntry) -> Option<&str> {
    entry.payload.get("epoch_id").and_then(Value::as_str)
}

pub(crate) fn latest_epoch_digest(entries: &[LedgerEntry], epoch_id: &str) -> Option<ContentHash> {
    entries
        .iter()
        .rev()
        .filter(|e| entry_epoch(e) == Some(epoch_id))
        .find_map(|e| {
            e.payload
                .get(EPOCH_DIGEST_FIELD)
                .and_then(Value::as_str)
                .and_then(|hex| ContentHash::from_hex(hex).ok())
        })
}

/// Fold the bundles among `entries` into a digest; returns it with the
/// bundle count.
pub(crate) fn replay_bundles(entries: &[LedgerEntry]) -> LedgerResult<(ContentHash, usize)> {
    let mut digest = ContentHash::zero();
    let mut bundles = 0;
    for entry in entries.iter().filter(|e| e.payload.get(BUNDLE_DIGEST_FIELD).is_some()) {
        digest = chain_epoch_digest(&digest, &bundle_digest(&entry.payload)?);
        bundles += 1;
    }
    Ok((digest, bundles))
}
