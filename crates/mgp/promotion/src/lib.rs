//! # mgp-promotion
//!
//! Promotion of mutations through a fixed lifecycle:
//! `proposed → certified → activated`, with `rejected` reachable from either
//! non-terminal state.
//!
//! Rules are `(name, priority, from, to, conditions)`. For the current state
//! the highest-priority rule whose conditions hold decides the next state;
//! when none holds the mutation is rejected. Duplicate priorities leaving the
//! same state are refused at load time.
//!
//! ## Key Types
//!
//! - [`PromotionPolicyEngine`]: rule evaluation, with automatic simulation
//! - [`PromotionPolicy`]: rule document, including the legacy flat schema
//! - [`PromotionTracker`]: per-mutation state and hash-linked [`PromotionEvent`]s

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod policy;
pub mod rule;
pub mod tracker;

pub use engine::{PromotionDecision, PromotionPolicyEngine, DEFAULT_REJECT_RULE};
pub use error::{require_transition, PromotionError, PromotionResult};
pub use mgp_types::PromotionState;
pub use policy::{LegacyPromotionPolicy, PromotionPolicy, DEFAULT_POLICY_VERSION};
pub use rule::{risk_tier, MutationData, PromotionConditions, PromotionRule, RiskTier};
pub use tracker::{PromotionEvent, PromotionTracker, TrackedMutation};
