use std::path::Path;

use mgp_types::{ChainStatus, ContentHash};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::entry::LedgerEntry;
use crate::epoch::{
    bundle_digest, chain_epoch_digest, entry_epoch, latest_epoch_digest, replay_bundles,
    EpochReplay, BUNDLE_DIGEST_FIELD, EPOCH_DIGEST_FIELD,
};
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{write_snapshot, FileLedgerStorage, LedgerStorage, MemoryLedgerStorage};

struct Inner {
    entries: Vec<LedgerEntry>,
    storage: Box<dyn LedgerStorage>,
}

/// Append-only, hash-chained record store.
///
/// Appends are serialized through a single lock that covers both the
/// in-memory chain head and the durable write, so the head hash used for
/// linking is always the hash of the last record on disk.
pub struct Ledger {
    inner: Mutex<Inner>,
}

impl Ledger {
    /// Build a ledger over any storage backend, replaying existing records.
    pub fn with_storage(mut storage: Box<dyn LedgerStorage>) -> LedgerResult<Self> {
        let entries = storage.load()?;
        info!(
            location = %storage.describe(),
            entries = entries.len(),
            "Ledger opened"
        );
        Ok(Self {
            inner: Mutex::new(Inner { entries, storage }),
        })
    }

    /// Open (or create) a JSONL ledger file.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        Self::with_storage(Box::new(FileLedgerStorage::open(path.as_ref())?))
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                storage: Box::new(MemoryLedgerStorage::new()),
            }),
        }
    }

    /// Append a payload, linking it to the current head.
    pub fn append(&self, payload: Value) -> LedgerResult<LedgerEntry> {
        let mut inner = self.inner.lock();
        Self::append_locked(&mut inner, payload)
    }

    /// Append a bundle record to `epoch_id`'s digest chain.
    ///
    /// Sets `bundle_digest` and `epoch_digest` on the payload, chaining from
    /// the epoch's last recorded digest. Reading the previous digest and
    /// appending happen under one lock, so concurrent bundles cannot fork
    /// the epoch chain.
    pub fn append_bundle(&self, epoch_id: &str, mut payload: Value) -> LedgerResult<LedgerEntry> {
        let mut inner = self.inner.lock();
        let previous = latest_epoch_digest(&inner.entries, epoch_id).unwrap_or_else(ContentHash::zero);
        let bundle = bundle_digest(&payload)?;
        let epoch = chain_epoch_digest(&previous, &bundle);
        let Value::Object(map) = &mut payload else {
            return Err(LedgerError::InvalidRecord("bundle_not_an_object".into()));
        };
        map.insert("epoch_id".into(), Value::String(epoch_id.to_string()));
        map.insert(BUNDLE_DIGEST_FIELD.into(), Value::String(bundle.to_hex()));
        map.insert(EPOCH_DIGEST_FIELD.into(), Value::String(epoch.to_hex()));
        Self::append_locked(&mut inner, payload)
    }

    fn append_locked(inner: &mut Inner, payload: Value) -> LedgerResult<LedgerEntry> {
        let prev_hash = inner
            .entries
            .last()
            .map(|e| e.hash)
            .unwrap_or_else(ContentHash::zero);
        let entry = LedgerEntry::chained(prev_hash, payload)?;
        inner.storage.append(&entry)?;
        inner.entries.push(entry.clone());
        debug!(
            index = inner.entries.len() - 1,
            hash = %entry.hash.short(),
            record_type = entry.record_type().unwrap_or("-"),
            "Ledger entry appended"
        );
        Ok(entry)
    }

    /// Append any serializable record.
    pub fn append_record<T: Serialize>(&self, record: &T) -> LedgerResult<LedgerEntry> {
        self.append(serde_json::to_value(record)?)
    }

    /// Entries in `[start, end)`. `end` is clamped to the ledger length.
    pub fn read_range(&self, start: usize, end: usize) -> LedgerResult<Vec<LedgerEntry>> {
        if start > end {
            return Err(LedgerError::InvalidRange { start, end });
        }
        let inner = self.inner.lock();
        let end = end.min(inner.entries.len());
        let start = start.min(end);
        Ok(inner.entries[start..end].to_vec())
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn get(&self, index: usize) -> Option<LedgerEntry> {
        self.inner.lock().entries.get(index).cloned()
    }

    pub fn last(&self) -> Option<LedgerEntry> {
        self.inner.lock().entries.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head_hash(&self) -> ContentHash {
        self.inner
            .lock()
            .entries
            .last()
            .map(|e| e.hash)
            .unwrap_or_else(ContentHash::zero)
    }

    /// Entries whose payload `type` equals `record_type`.
    pub fn entries_of_type(&self, record_type: &str) -> Vec<LedgerEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.record_type() == Some(record_type))
            .cloned()
            .collect()
    }

    /// Entries whose payload belongs to `epoch_id`, in ledger order.
    pub fn epoch_entries(&self, epoch_id: &str) -> Vec<LedgerEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| entry_epoch(e) == Some(epoch_id))
            .cloned()
            .collect()
    }

    /// Epoch ids in order of first appearance.
    pub fn epoch_ids(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut seen: Vec<String> = Vec::new();
        for epoch in inner.entries.iter().filter_map(entry_epoch) {
            if !epoch.is_empty() && !seen.iter().any(|s| s == epoch) {
                seen.push(epoch.to_string());
            }
        }
        seen
    }

    /// The last epoch digest recorded for `epoch_id`, by a bundle or a
    /// checkpoint.
    pub fn epoch_digest(&self, epoch_id: &str) -> Option<ContentHash> {
        latest_epoch_digest(&self.inner.lock().entries, epoch_id)
    }

    /// Rebuild `epoch_id`'s digest chain from the bundle records' content,
    /// ignoring the digests they carry.
    pub fn compute_incremental_epoch_digest(&self, epoch_id: &str) -> LedgerResult<ContentHash> {
        Ok(replay_bundles(&self.epoch_entries(epoch_id))?.0)
    }

    /// Digest over every record of `epoch_id`, bundles or not.
    pub fn compute_epoch_digest(&self, epoch_id: &str) -> LedgerResult<ContentHash> {
        let payloads: Vec<Value> = self
            .epoch_entries(epoch_id)
            .into_iter()
            .map(|e| e.payload)
            .collect();
        Ok(ContentHash::of_canonical(&payloads)?)
    }

    /// Replay `epoch_id` and compare against its last recorded digest.
    pub fn replay_epoch(&self, epoch_id: &str) -> LedgerResult<EpochReplay> {
        let entries = self.epoch_entries(epoch_id);
        let (replayed, bundles) = replay_bundles(&entries)?;
        let expected = latest_epoch_digest(&entries, epoch_id);
        let passed = expected.unwrap_or_else(ContentHash::zero) == replayed;
        if !passed {
            warn!(
                epoch_id,
                expected = ?expected.map(|h| h.short()),
                replayed = %replayed.short(),
                "Epoch digest replay diverged"
            );
        }
        Ok(EpochReplay {
            epoch_id: epoch_id.to_string(),
            bundles,
            expected,
            replayed,
            passed,
        })
    }

    /// Recompute the chain from the first entry.
    pub fn verify_chain(&self) -> ChainStatus {
        let inner = self.inner.lock();
        let status = verify_entries(&inner.entries);
        if !status.ok {
            warn!(
                first_broken_index = ?status.first_broken_index,
                reason = status.reason.as_deref().unwrap_or(""),
                "Ledger chain verification failed"
            );
        }
        status
    }

    /// Like [`Ledger::verify_chain`] but as a `Result`.
    pub fn ensure_intact(&self) -> LedgerResult<()> {
        let status = self.verify_chain();
        match status.first_broken_index {
            None => Ok(()),
            Some(index) => Err(LedgerError::IntegrityViolation {
                index,
                reason: status.reason.unwrap_or_default(),
            }),
        }
    }

    /// Export the full chain to `path` atomically.
    pub fn export(&self, path: &Path) -> LedgerResult<()> {
        let inner = self.inner.lock();
        write_snapshot(path, &inner.entries)
    }
}

/// Verify a detached sequence of entries, as an external auditor would.
pub fn verify_entries(entries: &[LedgerEntry]) -> ChainStatus {
    let mut prev = ContentHash::zero();
    for (index, entry) in entries.iter().enumerate() {
        if entry.prev_hash != prev {
            return ChainStatus::broken(entries.len(), index, prev, "prev_hash_mismatch");
        }
        match LedgerEntry::compute_hash(&prev, &entry.payload) {
            Ok(computed) if computed == entry.hash => prev = computed,
            Ok(_) => return ChainStatus::broken(entries.len(), index, prev, "hash_mismatch"),
            Err(e) => {
                return ChainStatus::broken(entries.len(), index, prev, format!("unhashable:{e}"))
            }
        }
    }
    ChainStatus::intact(entries.len(), prev)
}
