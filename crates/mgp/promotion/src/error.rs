use mgp_simulation::SimulationError;
use mgp_types::PromotionState;

#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error("invalid promotion transition: {from} -> {to}")]
    InvalidTransition {
        from: PromotionState,
        to: PromotionState,
    },

    /// Two rules leaving the same state share a priority.
    #[error("duplicate_priority:{from}:{priority}")]
    DuplicatePriority { from: PromotionState, priority: i64 },

    #[error("promotion_policy_invalid:{0}")]
    InvalidPolicy(String),

    #[error("promotion_mutation_unknown:{0}")]
    UnknownMutation(String),

    #[error("promotion_state_terminal:{mutation_id}:{state}")]
    Terminal {
        mutation_id: String,
        state: PromotionState,
    },

    #[error("promotion simulation failed: {0}")]
    Simulation(#[from] SimulationError),

    #[error("promotion serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PromotionResult<T> = Result<T, PromotionError>;

/// Refuse any edge outside the fixed lifecycle graph.
pub fn require_transition(from: PromotionState, to: PromotionState) -> PromotionResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(PromotionError::InvalidTransition { from, to })
    }
}
