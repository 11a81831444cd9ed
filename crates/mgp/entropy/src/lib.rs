//! # mgp-entropy
//!
//! Caps the nondeterminism a mutation may introduce and the cost the
//! pipeline may spend on mutations.
//!
//! ## Key Types
//!
//! - [`EntropyRecord`]: bits attributed to one mutation, split by [`EntropySource`]
//! - [`EntropyAccountant`]: per-mutation and per-epoch ceilings with atomic commit
//! - [`MutationBudgetManager`]: cost and ROI gating per cycle and epoch
//!
//! Small mutations cannot sidestep the epoch ceiling by fragmenting: every
//! accepted mutation is charged to its epoch before the next decision.

#![deny(unsafe_code)]

pub mod accountant;
pub mod budget;
pub mod error;
pub mod record;

pub use accountant::{
    enforce_entropy_policy, EntropyAccountant, EntropyCeiling, EntropyDecision, EntropyPolicy,
};
pub use budget::{
    BudgetAdaptation, BudgetConfig, BudgetDecision, BudgetRequest, MutationBudgetManager,
    RollingMetrics,
};
pub use error::{EntropyError, EntropyResult};
pub use record::{
    estimate_entropy_bits, EntropyRecord, EntropySource, BITS_PER_OP, BITS_PER_TARGET,
    RANDOM_SEED_PENALTY_BITS,
};
