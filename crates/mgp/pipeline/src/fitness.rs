//! Fitness scoring seam.
//!
//! Scoring is an external collaborator with no governance authority: it
//! turns a test run into numbers and the promotion rules decide.

use mgp_sandbox::{ExecutionReport, RunStatus};
use mgp_types::MutationRequest;
use serde::{Deserialize, Serialize};

/// Score and risk, both in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitnessScore {
    pub score: f64,
    pub risk_score: f64,
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl FitnessScore {
    /// Clamp into range. NaN counts as zero.
    pub fn new(score: f64, risk_score: f64) -> Self {
        Self {
            score: unit(score),
            risk_score: unit(risk_score),
        }
    }
}

pub trait FitnessScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Fitness gain forecast for the budget gate, before anything runs.
    fn expected_gain(&self, request: &MutationRequest) -> f64;

    fn score(&self, request: &MutationRequest, report: &ExecutionReport) -> FitnessScore;
}

/// Fixed answers, for tests and dry runs.
#[derive(Clone, Debug)]
pub struct StaticFitness {
    score: FitnessScore,
    expected_gain: f64,
}

impl StaticFitness {
    pub fn new(score: f64, risk_score: f64) -> Self {
        Self {
            score: FitnessScore::new(score, risk_score),
            expected_gain: 1.0,
        }
    }

    pub fn with_expected_gain(mut self, gain: f64) -> Self {
        self.expected_gain = gain;
        self
    }
}

impl FitnessScorer for StaticFitness {
    fn name(&self) -> &str {
        "static"
    }

    fn expected_gain(&self, _request: &MutationRequest) -> f64 {
        self.expected_gain
    }

    fn score(&self, _request: &MutationRequest, _report: &ExecutionReport) -> FitnessScore {
        self.score
    }
}

/// Scores from the test run alone: passing tests score full marks, with
/// risk growing with the number of ops.
#[derive(Clone, Copy, Debug, Default)]
pub struct TestOutcomeFitness;

impl FitnessScorer for TestOutcomeFitness {
    fn name(&self) -> &str {
        "test_outcome"
    }

    fn expected_gain(&self, request: &MutationRequest) -> f64 {
        request.ops.len() as f64
    }

    fn score(&self, request: &MutationRequest, report: &ExecutionReport) -> FitnessScore {
        let score = match report.status {
            RunStatus::Ok => 1.0,
            RunStatus::NoTests => 0.5,
            _ => 0.0,
        };
        let risk = 1.0 - 1.0 / (1.0 + request.ops.len() as f64 / 4.0);
        FitnessScore::new(score, risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgp_types::MutationOp;

    #[test]
    fn scores_are_clamped() {
        let s = FitnessScore::new(1.7, f64::NAN);
        assert_eq!(s.score, 1.0);
        assert_eq!(s.risk_score, 0.0);
        assert_eq!(FitnessScore::new(-0.2, 0.4).score, 0.0);
    }

    #[test]
    fn test_outcome_scoring() {
        let req = MutationRequest::new("a", "e", "n").with_op(MutationOp::replace("x.py", "x = 1\n"));
        let passing = TestOutcomeFitness.score(&req, &ExecutionReport::passing());
        assert_eq!(passing.score, 1.0);
        assert!((passing.risk_score - 0.2).abs() < 1e-9);

        let failed = TestOutcomeFitness.score(&req, &ExecutionReport::new(RunStatus::Failed, Some(1)));
        assert_eq!(failed.score, 0.0);
    }
}
