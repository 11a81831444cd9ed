//! Adversarial test: an edited lineage record is detected, and a broken
//! lineage stops mutations on every tier.

use std::sync::Arc;

use mgp_ledger::{Ledger, LedgerError, MemoryLedgerStorage};
use mgp_pipeline::{PipelineConfig, PipelineStage, RejectionKind, LINEAGE_CONTINUITY_FAILED};
use mgp_policy::PolicyEngine;
use mgp_sandbox::ScriptedExecutor;
use mgp_tests::{context_builder, open_pipeline, signed_request, simple_request};
use mgp_types::{MutationOp, Severity, Tier};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn history_lines(n: u64) -> Vec<String> {
    let ledger = Ledger::in_memory();
    for i in 0..n {
        ledger.append(json!({"type": "mutation_outcome", "seq": i})).unwrap();
    }
    ledger.entries().iter().map(|e| e.to_line().unwrap()).collect()
}

fn tamper(lines: &mut [String], index: usize) {
    let mut record: Value = serde_json::from_str(&lines[index]).unwrap();
    record["payload"]["seq"] = json!(999);
    lines[index] = record.to_string();
}

fn tampered_ledger() -> Arc<Ledger> {
    let mut lines = history_lines(3);
    tamper(&mut lines, 1);
    Arc::new(Ledger::with_storage(Box::new(MemoryLedgerStorage::from_lines(lines))).unwrap())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn edited_record_breaks_the_chain_at_its_index() {
    let ledger = tampered_ledger();
    let status = ledger.verify_chain();
    assert!(!status.ok);
    assert_eq!(status.first_broken_index, Some(1));
    assert_eq!(status.reason.as_deref(), Some("hash_mismatch"));
    assert!(matches!(
        ledger.ensure_intact(),
        Err(LedgerError::IntegrityViolation { index: 1, .. })
    ));
}

#[test]
fn edited_file_is_detected_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lineage.jsonl");
    {
        let ledger = Ledger::open(&path).unwrap();
        for i in 0..4 {
            ledger.append(json!({"type": "mutation_outcome", "seq": i})).unwrap();
        }
    }
    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    tamper(&mut lines, 2);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    let reopened = Ledger::open(&path).unwrap();
    assert_eq!(reopened.verify_chain().first_broken_index, Some(2));
}

#[tokio::test]
async fn broken_lineage_blocks_stable_agents() {
    let ctx = context_builder(PipelineConfig::default(), Arc::new(ScriptedExecutor::passing()))
        .with_ledger(tampered_ledger())
        .build()
        .unwrap();
    let pipeline = open_pipeline(ctx);

    let req = signed_request(
        "sample_agent",
        "n-1",
        [MutationOp::replace("src/cache.py", "def get(k):\n    return k\n")],
    );
    let outcome = pipeline.process(req).await.unwrap();

    assert!(outcome.is_rejected());
    assert_eq!(outcome.stage, PipelineStage::Policy);
    assert_eq!(outcome.kind, Some(RejectionKind::LedgerIntegrityFailure));
    assert_eq!(outcome.reason, LINEAGE_CONTINUITY_FAILED);
}

#[tokio::test]
async fn broken_lineage_blocks_sandbox_agents_too() {
    let executor = Arc::new(ScriptedExecutor::passing());
    let ctx = context_builder(PipelineConfig::default(), executor.clone())
        .with_ledger(tampered_ledger())
        .build()
        .unwrap();
    let pipeline = open_pipeline(ctx);

    let outcome = pipeline.process(simple_request("n-1")).await.unwrap();
    assert_eq!(outcome.tier, Tier::Sandbox);
    assert!(outcome.is_rejected(), "{outcome:?}");
    assert_eq!(outcome.stage, PipelineStage::Policy);
    assert_eq!(outcome.kind, Some(RejectionKind::LedgerIntegrityFailure));
    assert_eq!(outcome.reason, LINEAGE_CONTINUITY_FAILED);
    assert!(outcome.policy_digest.is_none());
    assert_eq!(executor.invocations(), 0);
}

#[test]
fn constitution_blocks_broken_lineage_on_every_tier() {
    let engine = PolicyEngine::with_default_constitution().unwrap();
    let rule = engine
        .ordered_rules()
        .find(|r| r.name == "lineage_continuity")
        .unwrap();
    for tier in [Tier::Sandbox, Tier::Stable, Tier::Production] {
        assert_eq!(rule.severity_for(tier), Severity::Blocking, "{tier}");
    }
}
