//! Per-mutation promotion state with a hash-linked event trail.

use std::collections::HashMap;

use mgp_types::{canonical_bytes, ContentHash, PromotionState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{require_transition, PromotionError, PromotionResult};

/// One state change. The id and hash depend only on transition material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionEvent {
    pub event_id: String,
    pub mutation_id: String,
    pub epoch_id: String,
    pub from_state: PromotionState,
    pub to_state: PromotionState,
    pub rule: String,
    pub policy_version: String,
    pub prev_event_hash: ContentHash,
    pub event_hash: ContentHash,
}

#[derive(Serialize)]
struct EventBody<'a> {
    event_id: &'a str,
    mutation_id: &'a str,
    epoch_id: &'a str,
    from_state: PromotionState,
    to_state: PromotionState,
    rule: &'a str,
    policy_version: &'a str,
    prev_event_hash: &'a ContentHash,
}

impl PromotionEvent {
    pub fn derive_event_id(
        mutation_id: &str,
        from: PromotionState,
        to: PromotionState,
        prev: &ContentHash,
    ) -> String {
        let prev = if prev.is_zero() { "root".to_string() } else { prev.to_hex() };
        let digest = ContentHash::hash(format!("{mutation_id}:{from}:{to}:{prev}").as_bytes());
        format!("evt_{}", &digest.to_hex()[..16])
    }

    fn compute_hash(&self) -> PromotionResult<ContentHash> {
        let body = EventBody {
            event_id: &self.event_id,
            mutation_id: &self.mutation_id,
            epoch_id: &self.epoch_id,
            from_state: self.from_state,
            to_state: self.to_state,
            rule: &self.rule,
            policy_version: &self.policy_version,
            prev_event_hash: &self.prev_event_hash,
        };
        Ok(ContentHash::hash(&canonical_bytes(&body)?))
    }

    pub fn verify(&self) -> bool {
        self.compute_hash().map(|h| h == self.event_hash).unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedMutation {
    pub mutation_id: String,
    pub epoch_id: String,
    pub state: PromotionState,
    pub events: Vec<PromotionEvent>,
}

impl TrackedMutation {
    fn head(&self) -> ContentHash {
        self.events
            .last()
            .map(|e| e.event_hash)
            .unwrap_or_else(ContentHash::zero)
    }
}

/// Tracks every mutation that has entered promotion. Terminal states are
/// never left, and a mutation id is never re-proposed once terminal.
#[derive(Debug, Default)]
pub struct PromotionTracker {
    mutations: Mutex<HashMap<String, TrackedMutation>>,
}

impl PromotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mutation in `Proposed`. Re-proposing a live mutation is a
    /// no-op; re-proposing a finished one is an error.
    pub fn propose(&self, mutation_id: &str, epoch_id: &str) -> PromotionResult<PromotionState> {
        let mut mutations = self.mutations.lock();
        if let Some(existing) = mutations.get(mutation_id) {
            if existing.state.is_terminal() {
                return Err(PromotionError::Terminal {
                    mutation_id: mutation_id.to_string(),
                    state: existing.state,
                });
            }
            return Ok(existing.state);
        }
        mutations.insert(
            mutation_id.to_string(),
            TrackedMutation {
                mutation_id: mutation_id.to_string(),
                epoch_id: epoch_id.to_string(),
                state: PromotionState::Proposed,
                events: Vec::new(),
            },
        );
        Ok(PromotionState::Proposed)
    }

    pub fn advance(
        &self,
        mutation_id: &str,
        to: PromotionState,
        rule: &str,
        policy_version: &str,
    ) -> PromotionResult<PromotionEvent> {
        let mut mutations = self.mutations.lock();
        let tracked = mutations
            .get_mut(mutation_id)
            .ok_or_else(|| PromotionError::UnknownMutation(mutation_id.to_string()))?;
        let from = tracked.state;
        require_transition(from, to)?;

        let prev = tracked.head();
        let mut event = PromotionEvent {
            event_id: PromotionEvent::derive_event_id(mutation_id, from, to, &prev),
            mutation_id: mutation_id.to_string(),
            epoch_id: tracked.epoch_id.clone(),
            from_state: from,
            to_state: to,
            rule: rule.to_string(),
            policy_version: policy_version.to_string(),
            prev_event_hash: prev,
            event_hash: ContentHash::zero(),
        };
        event.event_hash = event.compute_hash()?;

        tracked.state = to;
        tracked.events.push(event.clone());
        debug!(mutation_id, from = %from, to = %to, event = %event.event_id, "Promotion advanced");
        Ok(event)
    }

    pub fn state(&self, mutation_id: &str) -> Option<PromotionState> {
        self.mutations.lock().get(mutation_id).map(|m| m.state)
    }

    pub fn get(&self, mutation_id: &str) -> Option<TrackedMutation> {
        self.mutations.lock().get(mutation_id).cloned()
    }

    pub fn events(&self, mutation_id: &str) -> Vec<PromotionEvent> {
        self.mutations
            .lock()
            .get(mutation_id)
            .map(|m| m.events.clone())
            .unwrap_or_default()
    }
}
