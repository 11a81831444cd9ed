//! # mgp-ledger
//!
//! Append-only, hash-chained evidentiary ledger.
//!
//! Each record is one canonical JSON line `{hash, payload, prev_hash}` where
//! `hash = blake3(hex(prev_hash) ‖ canonical(payload))` and the first record
//! links to the zero hash. Verification walks the chain from the start and
//! reports the first index that disagrees; everything after it is untrusted.
//!
//! ## Key Types
//!
//! - [`Ledger`]: single-writer chain with `append`, `read_range`, `verify_chain`
//! - [`LedgerEntry`]: one linked record
//! - [`EpochReplay`]: per-epoch digest chain replayed from bundle records
//! - [`LedgerStorage`]: backend trait ([`FileLedgerStorage`], [`MemoryLedgerStorage`])

#![deny(unsafe_code)]

pub mod entry;
pub mod epoch;
pub mod error;
pub mod ledger;
pub mod storage;

pub use entry::LedgerEntry;
pub use epoch::{bundle_digest, chain_epoch_digest, EpochReplay, BUNDLE_DIGEST_FIELD, EPOCH_DIGEST_FIELD};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{verify_entries, Ledger};
pub use storage::{write_snapshot, FileLedgerStorage, LedgerStorage, MemoryLedgerStorage};
