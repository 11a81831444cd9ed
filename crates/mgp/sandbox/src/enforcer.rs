//! The staged sandbox run: prepare, preflight, isolate, run, account, evidence.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use mgp_ledger::Ledger;
use mgp_types::ContentHash;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::account::{account, SandboxViolation};
use crate::error::{SandboxError, SandboxResult};
use crate::evidence::{EvidenceInput, SandboxEvidence, EVIDENCE_RECORD_TYPE};
use crate::executor::{ExecutionReport, RunStatus, SandboxExecutor};
use crate::isolation::{IsolationBackend, IsolationPlan};
use crate::manifest::{ReplaySeed, SandboxManifest};
use crate::policy::SandboxPolicy;
use crate::preflight::analyze_execution_plan;

/// What the caller wants run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxJob {
    pub mutation_id: String,
    pub epoch_id: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<String>,
    /// Seed for the first attempt; retries always draw a fresh one.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SandboxJob {
    pub fn new<I, S>(mutation_id: impl Into<String>, epoch_id: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mutation_id: mutation_id.into(),
            epoch_id: epoch_id.into(),
            command: command.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_mount(mut self, path: impl Into<String>) -> Self {
        self.mounts.push(path.into());
        self
    }

    fn seed_for(&self, attempt: u32) -> ReplaySeed {
        match (attempt, self.seed) {
            (0, Some(seed)) => ReplaySeed::from_u64(seed),
            (0, None) => ReplaySeed::derive(&self.mutation_id, &self.epoch_id, 0),
            _ => ReplaySeed::random(),
        }
    }
}

/// Cancellation handle for one sandbox run (all of its attempts).
///
/// Cancelling before isolation completes aborts with no side effects; once
/// the command is running it is treated as a timeout.
#[derive(Clone, Debug)]
pub struct SandboxRun {
    cancel: Arc<watch::Sender<bool>>,
}

impl Default for SandboxRun {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxRun {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { cancel: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn ensure_live(&self) -> SandboxResult<()> {
        if self.is_cancelled() {
            Err(SandboxError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a sandbox run that reached the `run` stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub evidence: SandboxEvidence,
    pub report: ExecutionReport,
    pub plan: IsolationPlan,
    pub violation: Option<SandboxViolation>,
    pub attempts: u32,
    pub ledger_hash: ContentHash,
}

impl SandboxOutcome {
    pub fn passed(&self) -> bool {
        self.evidence.passed()
    }

    pub fn evidence_hash(&self) -> &ContentHash {
        &self.evidence.evidence_hash
    }

    /// Machine-readable reason for a non-passing outcome.
    pub fn reason(&self) -> String {
        match (&self.violation, self.evidence.status) {
            (Some(v), _) => v.to_string(),
            (None, RunStatus::Ok) => "ok".into(),
            (None, status) => format!("sandbox_tests_{}", status.as_str()),
        }
    }

    pub fn into_violation(self) -> SandboxResult<Self> {
        match self.violation {
            Some(v) => Err(SandboxError::Violation(v)),
            None => Ok(self),
        }
    }

    fn retriable(&self) -> bool {
        self.violation.is_none()
            && matches!(
                self.evidence.status,
                RunStatus::Failed | RunStatus::Timeout | RunStatus::Error
            )
    }
}

pub struct SandboxIsolationEnforcer {
    policy: SandboxPolicy,
    policy_hash: ContentHash,
    backend: Arc<dyn IsolationBackend>,
    executor: Arc<dyn SandboxExecutor>,
    evidence_ledger: Arc<Ledger>,
    evidence_lock: Mutex<()>,
    retry_limit: u32,
}

impl SandboxIsolationEnforcer {
    pub fn new(
        policy: SandboxPolicy,
        backend: Arc<dyn IsolationBackend>,
        executor: Arc<dyn SandboxExecutor>,
        evidence_ledger: Arc<Ledger>,
    ) -> SandboxResult<Self> {
        policy.validate()?;
        let policy_hash = policy.policy_hash()?;
        Ok(Self {
            policy,
            policy_hash,
            backend,
            executor,
            evidence_ledger,
            evidence_lock: Mutex::new(()),
            retry_limit: 0,
        })
    }

    /// Extra attempts allowed after a failed or timed-out run.
    pub fn with_retry_limit(mut self, retries: u32) -> Self {
        self.retry_limit = retries;
        self
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn policy_hash(&self) -> &ContentHash {
        &self.policy_hash
    }

    pub fn evidence_ledger(&self) -> &Arc<Ledger> {
        &self.evidence_ledger
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Build and validate the manifest for an attempt.
    pub fn prepare(&self, job: &SandboxJob, attempt: u32) -> SandboxResult<SandboxManifest> {
        let mut manifest = SandboxManifest::for_policy(
            job.mutation_id.clone(),
            job.epoch_id.clone(),
            job.seed_for(attempt),
            job.command.clone(),
            &self.policy,
        );
        manifest.env = job.env.clone();
        manifest.mounts = job.mounts.clone();
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn preflight(&self, manifest: &SandboxManifest) -> SandboxResult<()> {
        let report = analyze_execution_plan(manifest, &self.policy);
        if report.ok {
            Ok(())
        } else {
            Err(SandboxError::Preflight {
                violations: report.violations,
            })
        }
    }

    /// Ask the backend to commit to every control, then have the executor
    /// attest that it will apply each one. A panicking backend is a backend
    /// error, not a crash.
    pub fn isolate(&self, manifest: &SandboxManifest) -> SandboxResult<IsolationPlan> {
        let plan = catch_unwind(AssertUnwindSafe(|| self.backend.prepare(manifest, &self.policy)))
            .map_err(|payload| SandboxError::Backend(panic_detail(payload.as_ref())))??;
        if plan.controls.is_empty() {
            return Err(SandboxError::Unenforceable("incomplete_plan".into()));
        }
        let plan = self.executor.attest(plan, manifest);
        if let Some(control) = plan.first_unenforced() {
            return Err(SandboxError::Unenforceable(control.to_string()));
        }
        Ok(plan)
    }

    async fn execute(
        &self,
        manifest: &SandboxManifest,
        plan: &IsolationPlan,
        run: &SandboxRun,
    ) -> ExecutionReport {
        let limit = Duration::from_secs(manifest.timeout_s);
        let started = tokio::time::Instant::now();
        tokio::select! {
            result = tokio::time::timeout(limit, self.executor.execute(manifest, plan)) => match result {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    error!(mutation_id = %manifest.mutation_id, error = %e, "Sandbox executor failed");
                    ExecutionReport::new(RunStatus::Error, None).with_stderr(e.code())
                }
                Err(_) => {
                    warn!(mutation_id = %manifest.mutation_id, timeout_s = manifest.timeout_s, "Sandbox run timed out");
                    ExecutionReport::timed_out(started.elapsed().as_secs_f64())
                }
            },
            _ = run.cancelled() => {
                warn!(mutation_id = %manifest.mutation_id, "Sandbox run cancelled while running");
                ExecutionReport::timed_out(started.elapsed().as_secs_f64())
            }
        }
    }

    /// Append evidence chained to the previous evidence record.
    fn record(
        &self,
        manifest: &SandboxManifest,
        report: &ExecutionReport,
        status: RunStatus,
        attempt: u32,
        violation: Option<&SandboxViolation>,
    ) -> SandboxResult<(SandboxEvidence, ContentHash)> {
        let _guard = self.evidence_lock.lock();
        let prev = match self
            .evidence_ledger
            .entries_of_type(EVIDENCE_RECORD_TYPE)
            .last()
        {
            Some(entry) => SandboxEvidence::from_entry(entry)?.evidence_hash,
            None => ContentHash::zero(),
        };
        let evidence = SandboxEvidence::build(
            EvidenceInput {
                manifest,
                policy_hash: self.policy_hash,
                stdout: &report.stdout,
                stderr: &report.stderr,
                syscalls: &report.observed_syscalls,
                usage: &report.usage,
                exit_code: report.exit_code,
                status,
                attempt,
                violation: violation.map(ToString::to_string),
            },
            prev,
        )?;
        let entry = self.evidence_ledger.append(evidence.to_record()?)?;
        Ok((evidence, entry.hash))
    }

    /// One attempt through every stage.
    pub async fn run_attempt(
        &self,
        job: &SandboxJob,
        attempt: u32,
        run: &SandboxRun,
    ) -> SandboxResult<SandboxOutcome> {
        run.ensure_live()?;
        let manifest = self.prepare(job, attempt)?;
        self.preflight(&manifest)?;
        run.ensure_live()?;
        let plan = self.isolate(&manifest)?;
        run.ensure_live()?;

        debug!(
            mutation_id = %manifest.mutation_id,
            attempt,
            seed = %manifest.replay_seed,
            backend = %plan.backend,
            "Sandbox isolated; running"
        );
        let report = self.execute(&manifest, &plan, run).await;

        let violation = match report.status {
            RunStatus::Timeout | RunStatus::Error => None,
            _ => account(&report, &manifest, &self.policy).err(),
        };
        let status = match (&violation, report.status) {
            (Some(_), RunStatus::Ok | RunStatus::NoTests) => RunStatus::Failed,
            (_, status) => status,
        };
        if let Some(v) = &violation {
            warn!(mutation_id = %manifest.mutation_id, attempt, violation = %v, "Sandbox accounting violation");
        }

        let (evidence, ledger_hash) =
            self.record(&manifest, &report, status, attempt, violation.as_ref())?;
        info!(
            mutation_id = %manifest.mutation_id,
            attempt,
            status = status.as_str(),
            evidence = %evidence.evidence_hash.short(),
            "Sandbox evidence recorded"
        );
        Ok(SandboxOutcome {
            evidence,
            report,
            plan,
            violation,
            attempts: attempt + 1,
            ledger_hash,
        })
    }

    /// Run with a fresh seed on each retry. Violations are final; cancellation
    /// stops further attempts.
    pub async fn run_with_retry(&self, job: &SandboxJob, run: &SandboxRun) -> SandboxResult<SandboxOutcome> {
        let mut attempt = 0;
        loop {
            let outcome = self.run_attempt(job, attempt, run).await?;
            if outcome.passed()
                || !outcome.retriable()
                || attempt >= self.retry_limit
                || run.is_cancelled()
            {
                return Ok(outcome);
            }
            debug!(mutation_id = %job.mutation_id, attempt, reason = %outcome.reason(), "Retrying sandbox run");
            attempt += 1;
        }
    }

    pub async fn run(&self, job: &SandboxJob) -> SandboxResult<SandboxOutcome> {
        self.run_with_retry(job, &SandboxRun::new()).await
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic:{s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic:{s}")
    } else {
        "panic".to_string()
    }
}
