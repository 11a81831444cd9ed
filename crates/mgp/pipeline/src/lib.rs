//! # mgp-pipeline
//!
//! Fail-closed governance for self-modifying agents. Every mutation request
//! passes replay protection, the constitution, the entropy ceilings, the
//! mutation budget, an isolated sandbox run, fitness scoring and the
//! promotion rules, and every outcome lands in the lineage ledger.
//!
//! ## Key Types
//!
//! - [`PipelineConfig`]: TOML-backed settings with development and
//!   production presets
//! - [`GovernanceContext`]: the shared components, built once
//! - [`MutationGovernancePipeline`]: the stage sequence for one request,
//!   plus constitution amendments and epoch/law transitions
//! - [`WorkerPool`]: bounded concurrency with per-agent ordering
//! - [`PipelineOutcome`]: what happened, as recorded in the ledger

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod error;
pub mod fitness;
pub mod nonce;
pub mod outcome;
pub mod pipeline;
pub mod pool;
pub mod rate;
pub mod telemetry;

pub use config::{PipelineConfig, TelemetryConfig, FORCE_TIER_ENV};
pub use context::{GovernanceContext, GovernanceContextBuilder};
pub use error::{PipelineError, PipelineResult, RejectionKind};
pub use fitness::{FitnessScore, FitnessScorer, StaticFitness, TestOutcomeFitness};
pub use nonce::{NonceRegistry, NONCE_REPLAY};
pub use outcome::{
    OutcomeStatus, PipelineOutcome, PipelineStage, Proposal, OUTCOME_RECORD_TYPE,
};
pub use pipeline::{
    EpochLaw, MutationGovernancePipeline, EPOCH_ALREADY_OPEN, EPOCH_CLOSED_RECORD_TYPE,
    EPOCH_NOT_STARTED, EPOCH_STARTED_RECORD_TYPE, LINEAGE_CONTINUITY_FAILED, MISSING_EPOCH, NOOP,
    POLICY_AMENDMENT_RECORD_TYPE, REPLAY_VERIFICATION_RECORD_TYPE, SANDBOX_CERTIFIED_RULE,
    SIGNATURE_MISSING,
};
pub use pool::WorkerPool;
pub use rate::MutationRateTracker;
pub use telemetry::init_tracing;
