//! # mgp-policy
//!
//! Constitutional policy engine for mutation requests.
//!
//! A constitution is a versioned JSON document of rules. Each rule names a
//! validator from a closed set, a base severity, and per-tier overrides.
//! Loading is fail-closed: any schema problem refuses the document.
//!
//! ## Key Types
//!
//! - [`PolicyEngine`]: evaluates a request at a tier and returns a [`PolicyVerdict`]
//! - [`EvaluationContext`]: explicit inputs for validators (lineage, rates, resources)
//! - [`SourceSafetyCheck`]: pluggable syntax/import/complexity analysis
//! - [`GovernanceEnvelope`]: deterministic digest of an evaluation
//!
//! ## Evaluation
//!
//! A request passes iff no rule whose effective severity is `blocking` failed.
//! Warnings and advisories are reported but never block.

#![deny(unsafe_code)]

pub mod context;
pub mod document;
pub mod engine;
pub mod error;
pub mod rule;
pub mod source_check;
pub mod validators;
pub mod verdict;

pub use context::{
    CoverageSnapshot, EntropyReadings, EvaluationContext, MutationRateSnapshot,
    PolicyThresholds, ResourceMeasurements, DEFAULT_BANNED_TOKENS,
};
pub use document::{
    load_policy_file, parse_policy_document, ConstitutionPolicy, CONSTITUTION_VERSION,
    DEFAULT_CONSTITUTION,
};
pub use engine::{Amendment, PolicyEngine};
pub use error::{PolicyError, PolicyResult};
pub use rule::{Applicability, Rule, RuleOutcome, ValidatorKind};
pub use source_check::{DelimiterBalanceCheck, SourceCheck, SourceSafetyCheck};
pub use validators::run_validator;
pub use verdict::{EnvelopeRow, GovernanceEnvelope, PolicyVerdict, Provenance, RuleVerdict};
