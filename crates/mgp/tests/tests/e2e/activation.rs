//! End-to-end: a signed sandbox-tier mutation with passing tests is
//! activated and leaves exactly one lineage entry pointing at its evidence.

use std::sync::Arc;

use mgp_ledger::Ledger;
use mgp_pipeline::{OutcomeStatus, PipelineConfig, PipelineStage, OUTCOME_RECORD_TYPE};
use mgp_promotion::PromotionState;
use mgp_sandbox::{verify_evidence_chain, ScriptedExecutor};
use mgp_tests::{make_pipeline, make_unopened_pipeline, simple_request, EPOCH};
use mgp_types::Tier;
use serde_json::Value;

#[tokio::test]
async fn signed_request_reaches_activated() {
    let executor = Arc::new(ScriptedExecutor::passing());
    let pipeline = make_pipeline(PipelineConfig::default(), executor.clone());
    let ledger = pipeline.context().ledger().clone();
    let before = ledger.len();

    let outcome = pipeline.process(simple_request("n-1")).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Executed, "{outcome:?}");
    assert_eq!(outcome.tier, Tier::Sandbox);
    assert_eq!(outcome.stage, PipelineStage::Ledger);
    assert_eq!(outcome.promotion_state, Some(PromotionState::Activated));
    assert_eq!(ledger.len(), before + 1);

    let entry = ledger.last().unwrap();
    assert_eq!(entry.hash, outcome.ledger_hash);
    assert_eq!(entry.record_type(), Some(OUTCOME_RECORD_TYPE));
    let evidence_hash = outcome.evidence_hash.unwrap();
    assert_eq!(entry.payload["evidence_hash"], Value::from(evidence_hash.to_hex()));

    let evidence = pipeline.context().evidence_ledger().entries();
    assert_eq!(evidence.len(), 1);
    assert_eq!(verify_evidence_chain(&evidence), Ok(()));
    assert_eq!(executor.invocations(), 1);
}

#[tokio::test]
async fn promotion_history_is_hash_linked() {
    let pipeline = make_pipeline(PipelineConfig::default(), Arc::new(ScriptedExecutor::passing()));
    let outcome = pipeline.process(simple_request("n-1")).await.unwrap();

    let events = pipeline.context().tracker().events(&outcome.mutation_id);
    let path: Vec<(PromotionState, PromotionState)> =
        events.iter().map(|e| (e.from_state, e.to_state)).collect();
    assert_eq!(
        path,
        vec![
            (PromotionState::Proposed, PromotionState::Certified),
            (PromotionState::Certified, PromotionState::Activated),
        ]
    );
    assert!(events.iter().all(|e| e.verify()));
    assert!(events[0].prev_event_hash.is_zero());
    assert_eq!(events[1].prev_event_hash, events[0].event_hash);
}

#[tokio::test]
async fn file_ledgers_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let lineage = dir.path().join("lineage.jsonl");
    let evidence = dir.path().join("evidence.jsonl");
    let config = PipelineConfig {
        ledger_path: Some(lineage.clone()),
        evidence_ledger_path: Some(evidence.clone()),
        ..PipelineConfig::default()
    };

    let head = {
        let pipeline = make_pipeline(config, Arc::new(ScriptedExecutor::passing()));
        pipeline.process(simple_request("n-1")).await.unwrap();
        pipeline.process(simple_request("n-2")).await.unwrap().ledger_hash
    };

    let reopened = Ledger::open(&lineage).unwrap();
    assert_eq!(reopened.len(), 3);
    assert_eq!(reopened.head_hash(), head);
    assert!(reopened.verify_chain().ok);
    assert_eq!(Ledger::open(&evidence).unwrap().len(), 2);
}

#[tokio::test]
async fn open_epoch_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        ledger_path: Some(dir.path().join("lineage.jsonl")),
        evidence_ledger_path: Some(dir.path().join("evidence.jsonl")),
        ..PipelineConfig::default()
    };

    let first = {
        let pipeline = make_pipeline(config.clone(), Arc::new(ScriptedExecutor::passing()));
        pipeline.process(simple_request("n-1")).await.unwrap()
    };

    let pipeline = make_unopened_pipeline(config, Arc::new(ScriptedExecutor::passing()));
    assert!(pipeline.context().is_epoch_open(EPOCH));
    let second = pipeline.process(simple_request("n-2")).await.unwrap();
    assert!(second.is_executed(), "{second:?}");

    let ledger = pipeline.context().ledger();
    let replay = ledger.replay_epoch(EPOCH).unwrap();
    assert!(replay.passed);
    assert_eq!(replay.bundles, 2);
    assert_ne!(first.ledger_hash, second.ledger_hash);
}
