//! Adversarial test: the promotion lifecycle cannot be skipped or reopened.

use std::sync::Arc;

use mgp_pipeline::{PipelineConfig, RejectionKind};
use mgp_promotion::{
    require_transition, PromotionError, PromotionPolicy, PromotionPolicyEngine, PromotionRule,
    PromotionState, PromotionTracker,
};
use mgp_sandbox::ScriptedExecutor;
use mgp_tests::{make_pipeline, simple_request};

#[test]
fn only_lifecycle_edges_are_allowed() {
    use PromotionState::*;
    let allowed = [
        (Proposed, Certified),
        (Proposed, Rejected),
        (Certified, Activated),
        (Certified, Rejected),
    ];
    for from in PromotionState::ALL {
        for to in PromotionState::ALL {
            let ok = require_transition(from, to).is_ok();
            assert_eq!(ok, allowed.contains(&(from, to)), "{from} -> {to}");
        }
    }
}

#[test]
fn tracker_refuses_skipping_certification() {
    let tracker = PromotionTracker::new();
    tracker.propose("mut-1", "epoch-1").unwrap();
    let err = tracker
        .advance("mut-1", PromotionState::Activated, "shortcut", "v1")
        .unwrap_err();
    assert!(matches!(
        err,
        PromotionError::InvalidTransition {
            from: PromotionState::Proposed,
            to: PromotionState::Activated
        }
    ));
    assert_eq!(tracker.state("mut-1"), Some(PromotionState::Proposed));
    assert!(tracker.events("mut-1").is_empty());
}

#[test]
fn terminal_mutations_stay_terminal() {
    let tracker = PromotionTracker::new();
    tracker.propose("mut-1", "epoch-1").unwrap();
    tracker.advance("mut-1", PromotionState::Rejected, "policy", "v1").unwrap();

    assert!(tracker.advance("mut-1", PromotionState::Certified, "retry", "v1").is_err());
    assert!(matches!(
        tracker.propose("mut-1", "epoch-1"),
        Err(PromotionError::Terminal { .. })
    ));
}

#[test]
fn policy_with_an_illegal_edge_is_refused() {
    let policy = PromotionPolicy::new(
        "bad-v1",
        vec![PromotionRule::new(
            "reopen",
            1,
            PromotionState::Activated,
            PromotionState::Proposed,
        )],
    );
    assert!(PromotionPolicyEngine::new(policy).is_err());
}

#[tokio::test]
async fn activated_mutation_cannot_be_resubmitted_after_epoch_reset() {
    let pipeline = make_pipeline(PipelineConfig::default(), Arc::new(ScriptedExecutor::passing()));
    let req = simple_request("n-1");
    let first = pipeline.process(req.clone()).await.unwrap();
    assert_eq!(first.promotion_state, Some(PromotionState::Activated));

    pipeline.close_epoch(&req.epoch_id).unwrap();
    pipeline.begin_epoch(&req.epoch_id, None).unwrap();
    let again = pipeline.process(req).await.unwrap();
    assert_eq!(again.kind, Some(RejectionKind::PromotionRejected));
    assert!(again.reason.starts_with("promotion_state_terminal:"), "{}", again.reason);
    assert_eq!(again.promotion_state, None);
}
