//! Adversarial test: splitting a large change into small mutations does not
//! get it past the per-epoch entropy ceiling.

use std::sync::Arc;

use mgp_entropy::{EntropyAccountant, EntropyCeiling, EntropyPolicy};
use mgp_pipeline::{PipelineConfig, RejectionKind, OUTCOME_RECORD_TYPE};
use mgp_sandbox::ScriptedExecutor;
use mgp_tests::{make_pipeline, signed_request, SANDBOX_AGENT};
use mgp_types::MutationOp;

/// Three ops over two targets: 3 * 2 + 2 * 1 = 8 bits.
fn eight_bit_ops() -> Vec<MutationOp> {
    vec![
        MutationOp::replace("src/a.py", "x = 1\n"),
        MutationOp::replace("src/a.py", "x = 2\n"),
        MutationOp::replace("src/b.py", "y = 1\n"),
    ]
}

#[test]
fn accountant_refuses_the_fourth_fragment() {
    let accountant = EntropyAccountant::new(EntropyPolicy::new("tight", 16, 24));
    let decisions: Vec<_> = (0..4).map(|_| accountant.enforce("epoch-1", 8, 0)).collect();

    assert!(decisions[..3].iter().all(|d| d.passed));
    assert!(!decisions[3].passed);
    assert_eq!(decisions[3].ceiling, Some(EntropyCeiling::Epoch));
    assert_eq!(decisions[3].epoch_bits, 32);
    assert_eq!(accountant.epoch_bits("epoch-1"), 24);
}

#[test]
fn rejected_fragment_does_not_consume_budget() {
    let accountant = EntropyAccountant::new(EntropyPolicy::new("tight", 16, 24));
    assert!(accountant.enforce("epoch-1", 16, 0).passed);
    assert!(!accountant.enforce("epoch-1", 12, 0).passed);
    assert!(accountant.enforce("epoch-1", 8, 0).passed);
    assert_eq!(accountant.epoch_bits("epoch-1"), 24);
}

#[tokio::test]
async fn pipeline_stops_fragmented_mutations() {
    let config = PipelineConfig {
        entropy: EntropyPolicy::new("tight", 16, 24),
        ..PipelineConfig::default()
    };
    let executor = Arc::new(ScriptedExecutor::passing());
    let pipeline = make_pipeline(config, executor.clone());

    let mut outcomes = Vec::new();
    for i in 0..4 {
        let req = signed_request(SANDBOX_AGENT, &format!("frag-{i}"), eight_bit_ops());
        outcomes.push(pipeline.process(req).await.unwrap());
    }

    assert!(outcomes[..3].iter().all(|o| o.is_executed()), "{outcomes:?}");
    assert_eq!(outcomes[3].kind, Some(RejectionKind::EntropyCeilingExceeded));
    assert_eq!(outcomes[3].reason, "entropy_ceiling_exceeded");
    assert_eq!(executor.invocations(), 3);
    assert_eq!(pipeline.context().ledger().entries_of_type(OUTCOME_RECORD_TYPE).len(), 4);
}
