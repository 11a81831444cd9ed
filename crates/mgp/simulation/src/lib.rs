//! # mgp-simulation
//!
//! Dry-run canary simulation that gates promotion.
//!
//! ## Key Types
//!
//! - [`SimulationCandidate`]: baseline, constraints, cohorts and canary stages
//! - [`SimulationRunner`]: evaluates stages in order, halting and rolling back as configured
//! - [`SimulationVerdict`]: outcome with a digest over its own payload

#![deny(unsafe_code)]

pub mod candidate;
pub mod error;
pub mod runner;

pub use candidate::{
    CanaryStage, Cohort, MetricSnapshot, SimulationCandidate, SimulationConstraints,
};
pub use error::{SimulationError, SimulationResult};
pub use runner::{
    evaluate_cohort, CohortResult, MetricChecks, SimulationRunner, SimulationStatus,
    SimulationVerdict, StageResult,
};
