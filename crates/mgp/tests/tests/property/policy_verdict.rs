//! Property tests: a policy verdict passes exactly when no blocking rule
//! failed, and evaluation is deterministic.

use mgp_policy::{EntropyReadings, EvaluationContext, MutationRateSnapshot, PolicyEngine};
use mgp_tests::{resign, signing_key};
use mgp_types::{
    ChainStatus, ContentHash, MutationOp, MutationRequest, SignatureVerifier, Tier,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_agent() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("test_subject-1"),
        Just("sample_agent"),
        Just("security_scanner"),
    ]
}

fn arb_source() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("def f(x):\n    return x\n".to_string()),
        Just("value = [1, 2, 3]\n".to_string()),
        Just("def broken(:\n".to_string()),
        Just("result = eval(payload)\n".to_string()),
        "[a-z_]{1,12} = [0-9]{1,4}\n",
    ]
}

fn arb_ops() -> impl Strategy<Value = Vec<MutationOp>> {
    prop::collection::vec(
        (prop_oneof![Just("src/a.py"), Just("src/b.py"), Just("lib/c.py")], arb_source())
            .prop_map(|(target, source)| MutationOp::replace(target, source)),
        1..4,
    )
}

fn arb_request() -> impl Strategy<Value = MutationRequest> {
    (arb_agent(), "[a-z0-9]{4,10}", arb_ops(), any::<bool>()).prop_map(
        |(agent, nonce, ops, signed)| {
            let mut req = MutationRequest::new(agent, "epoch-1", nonce);
            for op in ops {
                req = req.with_op(op);
            }
            if signed {
                resign(req)
            } else {
                req.with_signature("00")
            }
        },
    )
}

fn arb_tier() -> impl Strategy<Value = Option<Tier>> {
    prop_oneof![
        Just(None),
        Just(Some(Tier::Sandbox)),
        Just(Some(Tier::Stable)),
        Just(Some(Tier::Production)),
    ]
}

fn arb_context() -> impl Strategy<Value = EvaluationContext> {
    (any::<bool>(), 0u64..20, 0u64..200, 0u64..400).prop_map(
        |(lineage_ok, recent, mutation_bits, epoch_bits)| {
            let lineage = if lineage_ok {
                ChainStatus::intact(3, ContentHash::hash(b"head"))
            } else {
                ChainStatus::broken(3, 1, ContentHash::hash(b"head"), "hash_mismatch")
            };
            EvaluationContext::new(SignatureVerifier::new().with_trusted_key(signing_key().verifying_key()))
                .with_lineage(lineage)
                .with_mutation_rate(MutationRateSnapshot {
                    count: recent,
                    window_secs: 3600,
                })
                .with_entropy(EntropyReadings {
                    declared_bits: mutation_bits,
                    observed_bits: 0,
                    epoch_bits: epoch_bits.max(mutation_bits),
                })
        },
    )
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn passed_iff_no_blocking_failures(
        req in arb_request(),
        forced in arb_tier(),
        ctx in arb_context(),
    ) {
        let engine = PolicyEngine::with_default_constitution().unwrap();
        let tier = mgp_types::determine_tier(&req.agent_id, forced);
        let verdict = engine.evaluate(&req, tier, &ctx);

        prop_assert_eq!(verdict.passed, verdict.blocking_failures.is_empty());
        prop_assert_eq!(verdict.rejection_reason().is_some(), !verdict.passed);
        for rule in &verdict.warnings {
            prop_assert!(!verdict.blocking_failures.contains(rule));
        }
    }

    #[test]
    fn evaluation_is_deterministic(
        req in arb_request(),
        forced in arb_tier(),
        ctx in arb_context(),
    ) {
        let engine = PolicyEngine::with_default_constitution().unwrap();
        let tier = mgp_types::determine_tier(&req.agent_id, forced);
        let a = engine.evaluate(&req, tier, &ctx);
        let b = engine.evaluate(&req, tier, &ctx);
        prop_assert_eq!(a.envelope_digest, b.envelope_digest);
        prop_assert_eq!(a.blocking_failures, b.blocking_failures);
    }

    #[test]
    fn unsigned_requests_never_pass(req in arb_request(), ctx in arb_context()) {
        let engine = PolicyEngine::with_default_constitution().unwrap();
        let forged = req.with_signature("00");
        for tier in [Tier::Sandbox, Tier::Stable, Tier::Production] {
            let verdict = engine.evaluate(&forged, tier, &ctx);
            prop_assert!(!verdict.passed);
            prop_assert!(verdict.blocking_failures.contains(&"signature_required".to_string()));
        }
    }
}
