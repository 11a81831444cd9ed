//! Adversarial test: mismatched or malformed configuration stops the
//! pipeline before any request is governed.

use std::sync::Arc;

use mgp_pipeline::{
    PipelineConfig, PipelineError, RejectionKind, FORCE_TIER_ENV, POLICY_AMENDMENT_RECORD_TYPE,
};
use mgp_policy::DEFAULT_CONSTITUTION;
use mgp_sandbox::ScriptedExecutor;
use mgp_tests::{context_builder, make_pipeline};
use serde_json::Value;

fn constitution_with_version(version: &str) -> String {
    let mut doc: Value = serde_json::from_str(DEFAULT_CONSTITUTION).unwrap();
    doc["version"] = Value::from(version);
    doc.to_string()
}

#[test]
fn unexpected_builtin_version_fails_the_build() {
    let config = PipelineConfig {
        expected_constitution_version: "9.9.9".into(),
        ..PipelineConfig::default()
    };
    let err = context_builder(config, Arc::new(ScriptedExecutor::passing()))
        .build()
        .err()
        .unwrap();

    assert_eq!(err.kind(), RejectionKind::ConfigurationFailure);
    assert_eq!(err.to_string(), "constitution_version_mismatch:0.2.0!=9.9.9");
}

#[test]
fn constitution_file_with_another_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("constitution.json");
    std::fs::write(&path, constitution_with_version("0.3.0")).unwrap();

    let config = PipelineConfig {
        constitution_path: Some(path),
        ..PipelineConfig::default()
    };
    let err = context_builder(config, Arc::new(ScriptedExecutor::passing()))
        .build()
        .err()
        .unwrap();

    assert!(matches!(err, PipelineError::Policy(_)));
    assert_eq!(err.to_string(), "constitution_version_mismatch:0.3.0!=0.2.0");
}

#[test]
fn missing_constitution_file_is_refused() {
    let config = PipelineConfig {
        constitution_path: Some("/nonexistent/mgp/constitution.json".into()),
        ..PipelineConfig::default()
    };
    let err = context_builder(config, Arc::new(ScriptedExecutor::passing()))
        .build()
        .err()
        .unwrap();
    assert_eq!(err.kind(), RejectionKind::ConfigurationFailure);
}

#[test]
fn amendment_cannot_change_the_version() {
    let pipeline = make_pipeline(PipelineConfig::default(), Arc::new(ScriptedExecutor::passing()));
    let before = pipeline.context().policy().policy_hash();

    let err = pipeline
        .amend_policy(&constitution_with_version("0.3.0"))
        .unwrap_err();

    assert_eq!(err.to_string(), "constitution_version_mismatch:0.3.0!=0.2.0");
    assert_eq!(pipeline.context().policy().policy_hash(), before);
    assert!(pipeline
        .context()
        .ledger()
        .entries_of_type(POLICY_AMENDMENT_RECORD_TYPE)
        .is_empty());
}

#[test]
fn malformed_amendment_leaves_policy_in_force() {
    let pipeline = make_pipeline(PipelineConfig::default(), Arc::new(ScriptedExecutor::passing()));
    let before = pipeline.context().policy().policy_hash();

    let entries = pipeline.context().ledger().len();
    assert!(pipeline.amend_policy("{ not json").is_err());
    assert_eq!(pipeline.context().policy().policy_hash(), before);
    assert_eq!(pipeline.context().ledger().len(), entries);
}

#[test]
fn zero_worker_pool_is_invalid() {
    let err = PipelineConfig::from_toml("worker_pool_size = 0").unwrap_err();
    assert_eq!(err.to_string(), "pipeline_config_invalid:worker_pool_size");
}

#[test]
fn empty_sandbox_command_is_invalid() {
    let err = PipelineConfig::from_toml("sandbox_command = []").unwrap_err();
    assert_eq!(err.to_string(), "pipeline_config_invalid:sandbox_command");
}

#[test]
fn unknown_forced_tier_is_refused() {
    let mut config = PipelineConfig::default();
    let err = config
        .apply_overrides(|key| (key == FORCE_TIER_ENV).then(|| "GODMODE".to_string()))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    assert!(config.forced_tier.is_none());
}
