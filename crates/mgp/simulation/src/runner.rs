//! Canary stage evaluation.
//!
//! Pure and deterministic: identical candidates give byte-identical verdicts.

use std::fmt;

use mgp_types::{canonical_bytes, round_to, ContentHash};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::candidate::{CanaryStage, MetricSnapshot, SimulationCandidate, SimulationConstraints};
use crate::error::{SimulationError, SimulationResult};

const DELTA_PLACES: i32 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Passed,
    Failed,
    Rollback,
}

impl SimulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricChecks {
    pub error_rate: bool,
    pub latency_ms: bool,
    pub success_rate: bool,
}

impl MetricChecks {
    pub fn all(&self) -> bool {
        self.error_rate && self.latency_ms && self.success_rate
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CohortResult {
    pub cohort_id: String,
    pub passed: bool,
    pub checks: MetricChecks,
    pub delta: MetricSnapshot,
    pub observed: MetricSnapshot,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: String,
    pub passed: bool,
    pub failed_cohorts: Vec<String>,
    pub rollback_threshold: u32,
    pub rollback_triggered: bool,
    pub halted: bool,
    pub cohort_results: Vec<CohortResult>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationVerdict {
    pub candidate_id: String,
    pub dry_run: bool,
    pub status: SimulationStatus,
    pub passed: bool,
    pub halted: bool,
    pub rollback_triggered: bool,
    pub stage_results: Vec<StageResult>,
    /// Digest of every other field.
    pub verdict_digest: ContentHash,
}

/// The verdict body that the digest covers.
#[derive(Serialize)]
struct VerdictBody<'a> {
    candidate_id: &'a str,
    dry_run: bool,
    status: SimulationStatus,
    passed: bool,
    halted: bool,
    rollback_triggered: bool,
    stage_results: &'a [StageResult],
}

impl SimulationVerdict {
    fn digest_of(&self) -> SimulationResult<ContentHash> {
        let body = VerdictBody {
            candidate_id: &self.candidate_id,
            dry_run: self.dry_run,
            status: self.status,
            passed: self.passed,
            halted: self.halted,
            rollback_triggered: self.rollback_triggered,
            stage_results: &self.stage_results,
        };
        Ok(ContentHash::hash(&canonical_bytes(&body)?))
    }

    /// Recompute the digest and compare with the stored one.
    pub fn verify_digest(&self) -> SimulationResult<bool> {
        Ok(self.digest_of()? == self.verdict_digest)
    }
}

/// Compare one cohort against the baseline under the constraints.
pub fn evaluate_cohort(
    cohort_id: &str,
    baseline: &MetricSnapshot,
    observed: &MetricSnapshot,
    constraints: &SimulationConstraints,
) -> CohortResult {
    let error_delta = observed.error_rate - baseline.error_rate;
    let latency_delta = observed.latency_ms - baseline.latency_ms;
    let success_delta = observed.success_rate - baseline.success_rate;
    let checks = MetricChecks {
        error_rate: error_delta <= constraints.max_error_rate_delta,
        latency_ms: latency_delta <= constraints.max_latency_delta_ms,
        success_rate: success_delta >= constraints.min_success_rate_delta,
    };
    let rounded = |v: f64| round_to(v, DELTA_PLACES);
    CohortResult {
        cohort_id: cohort_id.to_string(),
        passed: checks.all(),
        checks,
        delta: MetricSnapshot {
            error_rate: rounded(error_delta),
            latency_ms: rounded(latency_delta),
            success_rate: rounded(success_delta),
        },
        observed: MetricSnapshot {
            error_rate: rounded(observed.error_rate),
            latency_ms: rounded(observed.latency_ms),
            success_rate: rounded(observed.success_rate),
        },
    }
}

/// Runs candidates through their canary stages.
#[derive(Clone, Debug, Default)]
pub struct SimulationRunner {
    default_stages: Vec<CanaryStage>,
}

impl SimulationRunner {
    /// Candidates without stages run as one stage over all their cohorts.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_stages(mut self, stages: Vec<CanaryStage>) -> Self {
        self.default_stages = stages;
        self
    }

    fn stages_for(&self, candidate: &SimulationCandidate) -> Vec<CanaryStage> {
        if !candidate.canary_stages.is_empty() {
            return candidate.canary_stages.clone();
        }
        if !self.default_stages.is_empty() {
            return self.default_stages.clone();
        }
        vec![CanaryStage::new(
            "canary",
            candidate.cohorts.iter().map(|c| c.cohort_id.clone()),
        )]
    }

    pub fn run(&self, candidate: &SimulationCandidate, dry_run: bool) -> SimulationResult<SimulationVerdict> {
        let stages = self.stages_for(candidate);
        for stage in &stages {
            stage.validate()?;
            if let Some(missing) = stage
                .cohort_ids
                .iter()
                .find(|id| candidate.cohort(id).is_none())
            {
                return Err(SimulationError::UnknownCohort {
                    stage: stage.stage_id.clone(),
                    cohort: missing.clone(),
                });
            }
        }

        let mut stage_results = Vec::with_capacity(stages.len());
        let mut status = SimulationStatus::Passed;
        let mut halted = false;
        let mut rollback_triggered = false;

        for stage in &stages {
            let cohort_results: Vec<CohortResult> = stage
                .cohort_ids
                .iter()
                .filter_map(|id| candidate.cohort(id))
                .map(|c| {
                    evaluate_cohort(&c.cohort_id, &candidate.baseline, &c.observed, &candidate.constraints)
                })
                .collect();
            let failed_cohorts: Vec<String> = cohort_results
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.cohort_id.clone())
                .collect();
            let failures = failed_cohorts.len() as u32;
            let stage_rollback = failures >= stage.rollback_threshold;
            let stage_halted = failures > 0 && stage.halt_on_fail;

            debug!(
                stage = %stage.stage_id,
                failures,
                rollback = stage_rollback,
                "Canary stage evaluated"
            );

            if stage_rollback {
                rollback_triggered = true;
                status = SimulationStatus::Rollback;
            } else if failures > 0 && status == SimulationStatus::Passed {
                status = SimulationStatus::Failed;
            }

            stage_results.push(StageResult {
                stage_id: stage.stage_id.clone(),
                passed: failures == 0,
                failed_cohorts,
                rollback_threshold: stage.rollback_threshold,
                rollback_triggered: stage_rollback,
                halted: stage_halted,
                cohort_results,
            });

            if stage_halted {
                halted = true;
                break;
            }
        }

        let mut verdict = SimulationVerdict {
            candidate_id: candidate.candidate_id.clone(),
            dry_run,
            status,
            passed: status == SimulationStatus::Passed,
            halted,
            rollback_triggered,
            stage_results,
            verdict_digest: ContentHash::zero(),
        };
        verdict.verdict_digest = verdict.digest_of()?;
        info!(
            candidate_id = %verdict.candidate_id,
            status = %verdict.status,
            digest = %verdict.verdict_digest.short(),
            "Simulation complete"
        );
        Ok(verdict)
    }
}
