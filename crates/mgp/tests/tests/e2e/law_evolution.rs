//! End-to-end: peers agree on law, then the law evolves across an epoch
//! boundary under a signed certificate.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use mgp_law::{
    evaluate_compatibility, issue_certificate, law_surface_digest, negotiate_manifests,
    sign_certificate, CertificateParams, CompatClass, LawManifest, NegotiationState,
};
use mgp_pipeline::{EpochLaw, PipelineConfig, PipelineError, EPOCH_STARTED_RECORD_TYPE};
use mgp_sandbox::ScriptedExecutor;
use mgp_tests::make_unopened_pipeline;
use serde_json::json;

fn manifest(node_id: &str, epoch_id: &str, modules: &[(&str, &str)]) -> LawManifest {
    let modules: Vec<_> = modules
        .iter()
        .map(|(id, version)| {
            json!({
                "id": id,
                "version": version,
                "kind": "core",
                "scope": "both",
                "applies_to": ["mutation", "epoch"],
                "trust_modes": ["prod"],
            })
        })
        .collect();
    serde_json::from_value(json!({
        "schema_version": "2.0.0",
        "node_id": node_id,
        "law_version": "founders_law@v2",
        "trust_mode": "prod",
        "epoch_id": epoch_id,
        "modules": modules,
        "signature": {"algo": "ed25519", "key_id": "law-signer", "value": "sig"},
    }))
    .unwrap()
}

#[test]
fn peers_bind_on_identical_module_sets() {
    let a = manifest("node-a", "epoch-1", &[("FL-Core", "2.0.0"), ("FL-Safety", "2.0.0")]);
    let b = manifest("node-b", "epoch-1", &[("FL-Core", "2.0.0"), ("FL-Safety", "2.0.0")]);

    let seen_by_b = evaluate_compatibility(&b, &a).unwrap();
    assert_eq!(seen_by_b.compat_class, CompatClass::FullCompatible);

    let outcome = negotiate_manifests(&a, &b, Some(&seen_by_b)).unwrap();
    assert_eq!(outcome.state, NegotiationState::Bound);
    assert_eq!(outcome.compat_digest, seen_by_b.compat_digest);
}

#[test]
fn certified_upgrade_is_anchored_on_the_epoch() {
    let pipeline = make_unopened_pipeline(
        PipelineConfig {
            require_replay_safe_law: true,
            ..PipelineConfig::default()
        },
        Arc::new(ScriptedExecutor::passing()),
    );
    let signer = SigningKey::from_bytes(&[11u8; 32]);
    let genesis = manifest("node-a", "epoch-1", &[("FL-Core", "2.0.0")]);
    let upgraded = manifest("node-a", "epoch-2", &[("FL-Core", "2.1.0")]);

    pipeline
        .begin_epoch("epoch-1", Some(EpochLaw::new(genesis.clone())))
        .unwrap();

    let mut unsafe_cert =
        issue_certificate(&genesis, &upgraded, &CertificateParams::new("upgrade", "law-signer"))
            .unwrap();
    sign_certificate(&mut unsafe_cert, &signer).unwrap();
    let err = pipeline
        .begin_epoch(
            "epoch-2",
            Some(EpochLaw::new(upgraded.clone()).with_certificate(unsafe_cert)),
        )
        .unwrap_err();
    match err {
        PipelineError::LawTransition(errors) => {
            assert_eq!(errors, vec!["certificate is not replay-safe".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }

    let mut cert = issue_certificate(
        &genesis,
        &upgraded,
        &CertificateParams::new("upgrade", "law-signer").replay_safe(),
    )
    .unwrap();
    sign_certificate(&mut cert, &signer).unwrap();
    let entry = pipeline
        .begin_epoch(
            "epoch-2",
            Some(
                EpochLaw::new(upgraded.clone())
                    .with_certificate(cert.clone())
                    .with_signer(signer.verifying_key()),
            ),
        )
        .unwrap();

    assert_eq!(entry.payload["type"], EPOCH_STARTED_RECORD_TYPE);
    assert_eq!(
        entry.payload["law"]["law_surface_digest"],
        json!(law_surface_digest(&upgraded).unwrap().to_hex())
    );
    assert_eq!(entry.payload["law"]["law_evolution_certificate_id"], json!(cert.certificate_id));
    assert_eq!(pipeline.context().law_manifest(), Some(upgraded));
}

#[test]
fn forged_signature_is_refused() {
    let pipeline = make_unopened_pipeline(PipelineConfig::default(), Arc::new(ScriptedExecutor::passing()));
    let genesis = manifest("node-a", "epoch-1", &[("FL-Core", "2.0.0")]);
    let upgraded = manifest("node-a", "epoch-2", &[("FL-Core", "2.1.0")]);
    pipeline
        .begin_epoch("epoch-1", Some(EpochLaw::new(genesis.clone())))
        .unwrap();

    let mut cert =
        issue_certificate(&genesis, &upgraded, &CertificateParams::new("upgrade", "law-signer"))
            .unwrap();
    sign_certificate(&mut cert, &SigningKey::from_bytes(&[66u8; 32])).unwrap();
    let trusted = SigningKey::from_bytes(&[11u8; 32]).verifying_key();
    let err = pipeline
        .begin_epoch(
            "epoch-2",
            Some(EpochLaw::new(upgraded).with_certificate(cert).with_signer(trusted)),
        )
        .unwrap_err();

    assert!(err.to_string().contains("certificate signature does not verify"), "{err}");
    assert_eq!(pipeline.context().law_manifest(), Some(genesis));
    assert_eq!(
        pipeline.context().ledger().entries_of_type(EPOCH_STARTED_RECORD_TYPE).len(),
        1
    );
}
