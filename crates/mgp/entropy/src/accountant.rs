//! Entropy ceilings per mutation and per epoch.
//!
//! The decision and the epoch accumulator update happen under one lock, so
//! concurrent mutations cannot jointly exceed the epoch ceiling.

use std::collections::HashMap;
use std::fmt;

use mgp_types::{canonical_bytes, ContentHash, MutationRequest};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EntropyError, EntropyResult};
use crate::record::EntropyRecord;

// ── Policy ──────────────────────────────────────────────────────────────

/// Entropy ceilings. A zero ceiling disables that check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyPolicy {
    pub policy_id: String,
    pub per_mutation_ceiling_bits: u64,
    pub per_epoch_ceiling_bits: u64,
}

impl Default for EntropyPolicy {
    fn default() -> Self {
        Self {
            policy_id: "entropy-default-v1".into(),
            per_mutation_ceiling_bits: 128,
            per_epoch_ceiling_bits: 4096,
        }
    }
}

impl EntropyPolicy {
    pub fn new(policy_id: impl Into<String>, per_mutation: u64, per_epoch: u64) -> Self {
        Self {
            policy_id: policy_id.into(),
            per_mutation_ceiling_bits: per_mutation,
            per_epoch_ceiling_bits: per_epoch,
        }
    }

    pub fn policy_hash(&self) -> EntropyResult<ContentHash> {
        Ok(ContentHash::hash(&canonical_bytes(self)?))
    }
}

/// Which ceiling a decision tripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyCeiling {
    Mutation,
    Epoch,
}

impl fmt::Display for EntropyCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mutation => "mutation",
            Self::Epoch => "epoch",
        })
    }
}

// ── Decision ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyDecision {
    pub passed: bool,
    pub declared_bits: u64,
    pub observed_bits: u64,
    /// `declared_bits + observed_bits`.
    pub mutation_bits: u64,
    /// Epoch total including this mutation.
    pub epoch_bits: u64,
    pub policy_id: String,
    pub reason: String,
    /// The first ceiling exceeded, mutation before epoch.
    pub ceiling: Option<EntropyCeiling>,
}

impl EntropyDecision {
    pub fn ensure_passed(&self, policy: &EntropyPolicy) -> EntropyResult<()> {
        match self.ceiling {
            None => Ok(()),
            Some(EntropyCeiling::Mutation) => Err(EntropyError::CeilingExceeded {
                scope: EntropyCeiling::Mutation,
                bits: self.mutation_bits,
                limit: policy.per_mutation_ceiling_bits,
            }),
            Some(EntropyCeiling::Epoch) => Err(EntropyError::CeilingExceeded {
                scope: EntropyCeiling::Epoch,
                bits: self.epoch_bits,
                limit: policy.per_epoch_ceiling_bits,
            }),
        }
    }
}

/// Pure ceiling check. `epoch_bits` already includes this mutation.
pub fn enforce_entropy_policy(
    policy: &EntropyPolicy,
    declared_bits: u64,
    observed_bits: u64,
    epoch_bits: u64,
) -> EntropyDecision {
    let mutation_bits = declared_bits + observed_bits;
    let over = |ceiling: u64, bits: u64| ceiling > 0 && bits > ceiling;
    let ceiling = if over(policy.per_mutation_ceiling_bits, mutation_bits) {
        Some(EntropyCeiling::Mutation)
    } else if over(policy.per_epoch_ceiling_bits, epoch_bits) {
        Some(EntropyCeiling::Epoch)
    } else {
        None
    };
    EntropyDecision {
        passed: ceiling.is_none(),
        declared_bits,
        observed_bits,
        mutation_bits,
        epoch_bits,
        policy_id: policy.policy_id.clone(),
        reason: if ceiling.is_none() {
            "ok".into()
        } else {
            "entropy_ceiling_exceeded".into()
        },
        ceiling,
    }
}

// ── Accountant ──────────────────────────────────────────────────────────

/// Tracks committed entropy per epoch.
#[derive(Debug, Default)]
pub struct EntropyAccountant {
    policy: EntropyPolicy,
    epochs: Mutex<HashMap<String, u64>>,
}

impl EntropyAccountant {
    pub fn new(policy: EntropyPolicy) -> Self {
        Self {
            policy,
            epochs: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &EntropyPolicy {
        &self.policy
    }

    pub fn estimate(&self, mutation_id: &str, request: &MutationRequest) -> EntropyRecord {
        EntropyRecord::estimate(mutation_id, request)
    }

    /// Decide and, when accepted, commit the bits to the epoch.
    pub fn enforce(&self, epoch_id: &str, declared_bits: u64, observed_bits: u64) -> EntropyDecision {
        let mut epochs = self.epochs.lock();
        let committed = epochs.get(epoch_id).copied().unwrap_or(0);
        let epoch_bits = committed + declared_bits + observed_bits;
        let decision = enforce_entropy_policy(&self.policy, declared_bits, observed_bits, epoch_bits);
        if decision.passed {
            epochs.insert(epoch_id.to_string(), epoch_bits);
            debug!(epoch_id, mutation_bits = decision.mutation_bits, epoch_bits, "Entropy committed");
        } else {
            warn!(
                epoch_id,
                mutation_bits = decision.mutation_bits,
                epoch_bits,
                ceiling = ?decision.ceiling,
                "Entropy ceiling exceeded"
            );
        }
        decision
    }

    /// Enforce a whole record against its own epoch.
    pub fn enforce_record(&self, record: &EntropyRecord) -> EntropyDecision {
        self.enforce(&record.epoch_id, record.declared_bits(), record.observed_bits())
    }

    /// The decision `enforce` would make, without committing.
    pub fn preview(&self, epoch_id: &str, declared_bits: u64, observed_bits: u64) -> EntropyDecision {
        let committed = self.epoch_bits(epoch_id);
        enforce_entropy_policy(
            &self.policy,
            declared_bits,
            observed_bits,
            committed + declared_bits + observed_bits,
        )
    }

    pub fn epoch_bits(&self, epoch_id: &str) -> u64 {
        self.epochs.lock().get(epoch_id).copied().unwrap_or(0)
    }

    /// Forget everything committed to an epoch.
    pub fn reset_epoch(&self, epoch_id: &str) {
        self.epochs.lock().remove(epoch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn make_accountant(per_mutation: u64, per_epoch: u64) -> EntropyAccountant {
        EntropyAccountant::new(EntropyPolicy::new("test", per_mutation, per_epoch))
    }

    #[test]
    fn fragmentation_cannot_bypass_epoch_ceiling() {
        let acct = make_accountant(16, 24);
        for _ in 0..3 {
            assert!(acct.enforce("e1", 8, 0).passed);
        }
        let fourth = acct.enforce("e1", 8, 0);
        assert!(!fourth.passed);
        assert_eq!(fourth.reason, "entropy_ceiling_exceeded");
        assert_eq!(fourth.ceiling, Some(EntropyCeiling::Epoch));
        assert_eq!(fourth.epoch_bits, 32);
        assert_eq!(acct.epoch_bits("e1"), 24);
    }

    #[test]
    fn mutation_ceiling_includes_observed() {
        let acct = make_accountant(10, 0);
        let d = acct.enforce("e1", 8, 3);
        assert!(!d.passed);
        assert_eq!(d.mutation_bits, 11);
        assert_eq!(d.ceiling, Some(EntropyCeiling::Mutation));
        assert_eq!(acct.epoch_bits("e1"), 0);
    }

    #[test]
    fn zero_ceilings_disable_checks() {
        let acct = make_accountant(0, 0);
        assert!(acct.enforce("e1", 10_000, 10_000).passed);
    }

    #[test]
    fn epochs_are_independent_and_resettable() {
        let acct = make_accountant(0, 10);
        assert!(acct.enforce("e1", 10, 0).passed);
        assert!(acct.enforce("e2", 10, 0).passed);
        assert!(!acct.enforce("e1", 1, 0).passed);
        acct.reset_epoch("e1");
        assert!(acct.enforce("e1", 1, 0).passed);
    }

    #[test]
    fn preview_does_not_commit() {
        let acct = make_accountant(0, 10);
        assert!(acct.preview("e1", 10, 0).passed);
        assert!(acct.preview("e1", 10, 0).passed);
        assert_eq!(acct.epoch_bits("e1"), 0);
    }

    #[test]
    fn ensure_passed_maps_ceiling() {
        let policy = EntropyPolicy::new("p", 4, 0);
        let d = enforce_entropy_policy(&policy, 5, 0, 5);
        let err = d.ensure_passed(&policy).unwrap_err();
        assert_eq!(err.to_string(), "entropy_ceiling_exceeded:mutation:5>4");
    }

    #[test]
    fn concurrent_commits_respect_epoch_ceiling() {
        let acct = Arc::new(make_accountant(0, 100));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let acct = Arc::clone(&acct);
                thread::spawn(move || (0..10).filter(|_| acct.enforce("e1", 1, 0).passed).count())
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 100);
        assert_eq!(acct.epoch_bits("e1"), 100);
    }

    #[test]
    fn policy_hash_tracks_ceilings() {
        let a = EntropyPolicy::default().policy_hash().unwrap();
        let b = EntropyPolicy::new("entropy-default-v1", 128, 4095).policy_hash().unwrap();
        assert_ne!(a, b);
        assert_eq!(a, EntropyPolicy::default().policy_hash().unwrap());
    }
}
