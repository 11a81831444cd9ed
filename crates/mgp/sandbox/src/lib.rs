//! # mgp-sandbox
//!
//! Fail-closed isolation for mutation test runs.
//!
//! A run moves through `prepare → preflight → isolate → run → account →
//! evidence`. Nothing is spawned and nothing is recorded until the isolation
//! backend has committed to every required control. Once the command has
//! run, exactly one evidence record is chained into the evidence ledger,
//! whatever the outcome.
//!
//! ## Key Types
//!
//! - [`SandboxIsolationEnforcer`]: drives the staged run and retries
//! - [`SandboxManifest`] / [`SandboxPolicy`]: what a run may do
//! - [`IsolationBackend`]: process or container enforcement of controls
//! - [`SandboxExecutor`]: async seam for actually running the command;
//!   [`ProcessExecutor`] confines the child with seccomp, Landlock, rlimits
//!   and a capability drop
//! - [`SandboxEvidence`]: hash-linked record of one attempt

#![deny(unsafe_code)]

pub mod account;
mod confine;
pub mod enforcer;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod isolation;
pub mod manifest;
pub mod policy;
pub mod preflight;
pub mod replay;

pub use account::{
    account, enforce_network_egress_allowlist, enforce_resource_quotas,
    enforce_syscall_allowlist, enforce_write_path_allowlist, ResourceVerdict, SandboxViolation,
    FILTERED_SYSCALL,
};
pub use enforcer::{SandboxIsolationEnforcer, SandboxJob, SandboxOutcome, SandboxRun};
pub use error::{SandboxError, SandboxResult};
pub use evidence::{verify_evidence_chain, EvidenceInput, SandboxEvidence, EVIDENCE_RECORD_TYPE};
pub use executor::{
    ExecutionReport, FilterVerdict, ProcessExecutor, ResourceUsage, RunStatus,
    SandboxExecutor, ScriptedExecutor,
};
pub use isolation::{
    ContainerIsolationBackend, EnforcedControl, IsolationBackend, IsolationMode, IsolationPlan,
    ProcessIsolationBackend, CAPABILITY_CONTROL, NETWORK_CONTROL, RESOURCE_CONTROL,
    SYSCALL_CONTROL, WRITE_PATH_CONTROL,
};
pub use manifest::{ReplaySeed, SandboxManifest, REPLAY_SEED_LEN};
pub use policy::{SandboxPolicy, DEFAULT_PROFILE};
pub use preflight::{analyze_execution_plan, normalize_path, path_within, PreflightReport};
pub use replay::{verify_replay, ReplayObservation, ReplayReport};
