use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, SimulationResult};

/// Observed service metrics for a baseline or cohort.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSnapshot {
    pub error_rate: f64,
    pub latency_ms: f64,
    pub success_rate: f64,
}

/// Allowed movement of cohort metrics relative to the baseline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConstraints {
    pub max_error_rate_delta: f64,
    pub max_latency_delta_ms: f64,
    pub min_success_rate_delta: f64,
}

impl Default for SimulationConstraints {
    fn default() -> Self {
        Self {
            max_error_rate_delta: 0.0,
            max_latency_delta_ms: 0.0,
            min_success_rate_delta: -1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub cohort_id: String,
    #[serde(default)]
    pub observed: MetricSnapshot,
}

impl Cohort {
    pub fn new(cohort_id: impl Into<String>, observed: MetricSnapshot) -> Self {
        Self {
            cohort_id: cohort_id.into(),
            observed,
        }
    }
}

fn default_rollback_threshold() -> u32 {
    1
}

fn default_halt_on_fail() -> bool {
    true
}

/// One canary stage: a set of cohorts evaluated together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryStage {
    pub stage_id: String,
    pub cohort_ids: Vec<String>,
    /// Failed cohorts at or above this count trigger rollback. At least 1.
    #[serde(default = "default_rollback_threshold")]
    pub rollback_threshold: u32,
    #[serde(default = "default_halt_on_fail")]
    pub halt_on_fail: bool,
}

impl CanaryStage {
    pub fn new<I, S>(stage_id: impl Into<String>, cohort_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stage_id: stage_id.into(),
            cohort_ids: cohort_ids.into_iter().map(Into::into).collect(),
            rollback_threshold: 1,
            halt_on_fail: true,
        }
    }

    pub fn with_rollback_threshold(mut self, threshold: u32) -> Self {
        self.rollback_threshold = threshold;
        self
    }

    pub fn with_halt_on_fail(mut self, halt: bool) -> Self {
        self.halt_on_fail = halt;
        self
    }

    pub(crate) fn validate(&self) -> SimulationResult<()> {
        if self.rollback_threshold == 0 {
            return Err(SimulationError::InvalidStage {
                stage: self.stage_id.clone(),
                reason: "rollback_threshold_zero".into(),
            });
        }
        Ok(())
    }
}

fn default_candidate_id() -> String {
    "candidate".into()
}

/// A mutation candidate with observed canary metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationCandidate {
    #[serde(default = "default_candidate_id")]
    pub candidate_id: String,
    #[serde(default)]
    pub baseline: MetricSnapshot,
    #[serde(default)]
    pub constraints: SimulationConstraints,
    #[serde(default)]
    pub cohorts: Vec<Cohort>,
    /// Empty means the runner's default stages.
    #[serde(default)]
    pub canary_stages: Vec<CanaryStage>,
}

impl SimulationCandidate {
    pub fn new(candidate_id: impl Into<String>, baseline: MetricSnapshot) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            baseline,
            constraints: SimulationConstraints::default(),
            cohorts: Vec::new(),
            canary_stages: Vec::new(),
        }
    }

    pub fn with_constraints(mut self, constraints: SimulationConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_cohort(mut self, cohort: Cohort) -> Self {
        self.cohorts.push(cohort);
        self
    }

    pub fn with_stage(mut self, stage: CanaryStage) -> Self {
        self.canary_stages.push(stage);
        self
    }

    pub fn from_json(text: &str) -> SimulationResult<Self> {
        serde_json::from_str(text).map_err(|e| SimulationError::InvalidCandidate(e.to_string()))
    }

    pub fn cohort(&self, cohort_id: &str) -> Option<&Cohort> {
        self.cohorts.iter().find(|c| c.cohort_id == cohort_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults_apply() {
        let c = SimulationCandidate::from_json(
            r#"{"cohorts":[{"cohort_id":"a"}],"canary_stages":[{"stage_id":"s1","cohort_ids":["a"]}]}"#,
        )
        .unwrap();
        assert_eq!(c.candidate_id, "candidate");
        assert_eq!(c.constraints.min_success_rate_delta, -1.0);
        assert_eq!(c.canary_stages[0].rollback_threshold, 1);
        assert!(c.canary_stages[0].halt_on_fail);
        assert_eq!(c.cohort("a").unwrap().observed, MetricSnapshot::default());
    }

    #[test]
    fn malformed_candidate_rejected() {
        assert!(matches!(
            SimulationCandidate::from_json("{\"cohorts\": 3}"),
            Err(SimulationError::InvalidCandidate(_))
        ));
    }

    #[test]
    fn zero_threshold_is_invalid() {
        let stage = CanaryStage::new("s", ["a"]).with_rollback_threshold(0);
        assert!(stage.validate().is_err());
    }
}
