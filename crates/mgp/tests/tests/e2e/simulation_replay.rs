//! End-to-end: canary simulation is deterministic, and a promotion decided
//! on a simulation verdict is reproducible.

use std::sync::Arc;

use mgp_pipeline::{PipelineConfig, Proposal};
use mgp_promotion::{
    MutationData, PromotionConditions, PromotionPolicy, PromotionPolicyEngine, PromotionRule,
    PromotionState,
};
use mgp_sandbox::ScriptedExecutor;
use mgp_simulation::{
    CanaryStage, Cohort, MetricSnapshot, SimulationCandidate, SimulationRunner, SimulationStatus,
};
use mgp_tests::{context_builder, open_pipeline, simple_request};

fn baseline() -> MetricSnapshot {
    MetricSnapshot {
        error_rate: 0.02,
        latency_ms: 120.0,
        success_rate: 0.98,
    }
}

fn candidate(second_cohort_error: f64) -> SimulationCandidate {
    SimulationCandidate::new("cache-v2", baseline())
        .with_cohort(Cohort::new("eu", baseline()))
        .with_cohort(Cohort::new(
            "us",
            MetricSnapshot {
                error_rate: second_cohort_error,
                ..baseline()
            },
        ))
        .with_stage(CanaryStage::new("one-percent", ["eu"]))
        .with_stage(CanaryStage::new("ten-percent", ["eu", "us"]))
}

fn canary_engine() -> PromotionPolicyEngine {
    PromotionPolicyEngine::new(PromotionPolicy::new(
        "canary-v1",
        vec![PromotionRule::new(
            "activate_after_canary",
            10,
            PromotionState::Certified,
            PromotionState::Activated,
        )
        .with_conditions(PromotionConditions {
            min_score: Some(0.5),
            require_simulation_pass: true,
            ..Default::default()
        })],
    ))
    .unwrap()
}

#[test]
fn repeated_runs_are_identical() {
    let runner = SimulationRunner::new();
    let first = runner.run(&candidate(0.02), true).unwrap();
    let second = runner.run(&candidate(0.02), true).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.status, SimulationStatus::Passed);
    assert!(first.verify_digest().unwrap());
}

#[test]
fn regression_in_later_stage_rolls_back() {
    let verdict = SimulationRunner::new().run(&candidate(0.5), true).unwrap();
    assert!(!verdict.passed);
    assert_eq!(verdict.status, SimulationStatus::Rollback);
    assert!(verdict.stage_results[0].passed);
    assert_eq!(verdict.stage_results[1].failed_cohorts, vec!["us".to_string()]);
}

#[test]
fn promotion_decision_is_reproducible() {
    let engine = canary_engine();
    let decide = || {
        let mut data = MutationData::scored(0.8, 0.1).with_simulation_candidate(candidate(0.02));
        let decision = engine.evaluate_transition(PromotionState::Certified, &mut data).unwrap();
        (decision, data.simulation_verdict)
    };
    let (a, verdict_a) = decide();
    let (b, verdict_b) = decide();
    assert_eq!(a, b);
    assert_eq!(verdict_a, verdict_b);
    assert_eq!(a.to, PromotionState::Activated);
}

#[tokio::test]
async fn pipeline_promotes_on_canary_verdict() {
    let ctx = context_builder(PipelineConfig::default(), Arc::new(ScriptedExecutor::passing()))
        .with_promotion_engine(canary_engine())
        .build()
        .unwrap();
    let pipeline = open_pipeline(ctx);

    let healthy = pipeline
        .submit(Proposal::new(simple_request("n-1")).with_simulation_candidate(candidate(0.02)))
        .await
        .unwrap();
    assert_eq!(healthy.promotion_state, Some(PromotionState::Activated));

    let regressed = pipeline
        .submit(Proposal::new(simple_request("n-2")).with_simulation_candidate(candidate(0.5)))
        .await
        .unwrap();
    assert_eq!(regressed.promotion_state, Some(PromotionState::Rejected));
    assert_eq!(regressed.reason, "promotion_rejected:default_reject");
}
