//! Replay protection for mutation requests.

use std::collections::{HashMap, HashSet};

use mgp_types::MutationRequest;
use parking_lot::Mutex;

/// Reason code for a repeated `(agent_id, nonce)` within an epoch.
pub const NONCE_REPLAY: &str = "nonce_replay";

/// Remembers every `(agent_id, nonce)` seen per epoch.
#[derive(Debug, Default)]
pub struct NonceRegistry {
    epochs: Mutex<HashMap<String, HashSet<(String, String)>>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the request's nonce. False when it was already claimed.
    pub fn register(&self, request: &MutationRequest) -> bool {
        self.epochs
            .lock()
            .entry(request.epoch_id.clone())
            .or_default()
            .insert((request.agent_id.clone(), request.nonce.clone()))
    }

    pub fn contains(&self, request: &MutationRequest) -> bool {
        self.epochs.lock().get(&request.epoch_id).is_some_and(|seen| {
            seen.contains(&(request.agent_id.clone(), request.nonce.clone()))
        })
    }

    pub fn forget_epoch(&self, epoch_id: &str) {
        self.epochs.lock().remove(epoch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_unique_per_agent_and_epoch() {
        let registry = NonceRegistry::new();
        let req = MutationRequest::new("agent-a", "e1", "n1");
        assert!(registry.register(&req));
        assert!(!registry.register(&req));
        assert!(registry.contains(&req));

        assert!(registry.register(&MutationRequest::new("agent-b", "e1", "n1")));
        assert!(registry.register(&MutationRequest::new("agent-a", "e2", "n1")));

        registry.forget_epoch("e1");
        assert!(registry.register(&req));
    }
}
