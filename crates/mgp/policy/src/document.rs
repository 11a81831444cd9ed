//! Constitution document loading and schema validation.
//!
//! A document that fails any check is refused outright; there is no
//! partially-loaded or default-substituted policy.

use std::collections::BTreeMap;
use std::path::Path;

use mgp_types::{ContentHash, Severity, Tier};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{PolicyError, PolicyResult};
use crate::rule::{Applicability, Rule, ValidatorKind};

/// Constitution version this build evaluates.
pub const CONSTITUTION_VERSION: &str = "0.2.0";

/// The constitution shipped with the engine.
pub const DEFAULT_CONSTITUTION: &str = include_str!("../constitution/default.json");

/// A validated, immutable constitution.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstitutionPolicy {
    pub version: String,
    pub rules: Vec<Rule>,
    /// BLAKE3 over the exact document bytes.
    pub policy_hash: ContentHash,
}

/// Parse and validate a constitution document.
pub fn parse_policy_document(text: &str, expected_version: &str) -> PolicyResult<ConstitutionPolicy> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| PolicyError::InvalidJson(e.to_string()))?;
    let Value::Object(doc) = root else {
        return Err(PolicyError::schema("root_not_object"));
    };
    validate_schema(&doc, expected_version)?;

    let mut rules = Vec::new();
    for raw in doc["rules"].as_array().into_iter().flatten() {
        rules.push(build_rule(raw)?);
    }
    let policy = ConstitutionPolicy {
        version: expected_version.to_string(),
        rules,
        policy_hash: ContentHash::hash(text.as_bytes()),
    };
    info!(
        version = %policy.version,
        policy_hash = %policy.policy_hash.short(),
        rules = policy.rules.len(),
        "Constitution loaded"
    );
    Ok(policy)
}

/// Read and validate a constitution file.
pub fn load_policy_file(path: &Path, expected_version: &str) -> PolicyResult<ConstitutionPolicy> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PolicyError::Missing(format!("{}: {e}", path.display())))?;
    parse_policy_document(&text, expected_version)
}

fn validate_schema(doc: &Map<String, Value>, expected_version: &str) -> PolicyResult<()> {
    let version = doc.get("version").and_then(Value::as_str).unwrap_or("None");
    if version != expected_version {
        return Err(PolicyError::VersionMismatch {
            found: version.to_string(),
            expected: expected_version.to_string(),
        });
    }

    let tiers = match doc.get("tiers") {
        Some(Value::Object(t)) if !t.is_empty() => t,
        _ => return Err(PolicyError::schema("tiers")),
    };
    for tier in Tier::ALL {
        match tiers.get(tier.name()) {
            None => return Err(PolicyError::schema(format!("missing_tier:{}", tier.name()))),
            Some(v) if v.as_u64() != Some(tier.value() as u64) => {
                return Err(PolicyError::schema(format!(
                    "tier_value_mismatch:{}",
                    tier.name()
                )))
            }
            Some(_) => {}
        }
    }

    let severities: Option<Vec<&str>> = doc
        .get("severities")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect());
    let mut declared = severities.ok_or_else(|| PolicyError::schema("severities"))?;
    declared.sort_unstable();
    declared.dedup();
    let mut allowed: Vec<&str> = Severity::ALL.iter().map(Severity::as_str).collect();
    allowed.sort_unstable();
    if declared != allowed {
        return Err(PolicyError::schema("severities"));
    }

    let Some(Value::Object(immutability)) = doc.get("immutability_constraints") else {
        return Err(PolicyError::schema("immutability_constraints"));
    };
    let required_keys: Vec<&str> = match immutability.get("required_rule_keys") {
        Some(Value::Array(keys)) if !keys.is_empty() => keys.iter().filter_map(Value::as_str).collect(),
        _ => return Err(PolicyError::schema("required_rule_keys")),
    };

    let rules = match doc.get("rules") {
        Some(Value::Array(r)) if !r.is_empty() => r,
        _ => return Err(PolicyError::schema("rules")),
    };
    for (index, raw) in rules.iter().enumerate() {
        let Value::Object(rule) = raw else {
            return Err(PolicyError::schema(format!("rule_not_object:{index}")));
        };
        let missing: Vec<&str> = required_keys
            .iter()
            .copied()
            .filter(|k| !rule.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(PolicyError::schema(format!(
                "rule_missing_keys:{index}:{}",
                missing.join(",")
            )));
        }
        let label = rule
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| index.to_string());
        let severity_ok = rule
            .get("severity")
            .and_then(Value::as_str)
            .is_some_and(|s| s.parse::<Severity>().is_ok());
        if !severity_ok {
            return Err(PolicyError::schema(format!("rule_severity:{label}")));
        }
        let validator = rule.get("validator").and_then(Value::as_str).unwrap_or("None");
        if validator.parse::<ValidatorKind>().is_err() {
            return Err(PolicyError::schema(format!("validator:{validator}")));
        }
        let Some(Value::Object(overrides)) = rule.get("tier_overrides") else {
            return Err(PolicyError::schema(format!("tier_overrides:{label}")));
        };
        for (tier_name, severity) in overrides {
            if !tiers.contains_key(tier_name) {
                return Err(PolicyError::schema(format!("override_tier:{label}:{tier_name}")));
            }
            let severity_name = severity.as_str().unwrap_or("None");
            if severity_name.parse::<Severity>().is_err() {
                return Err(PolicyError::schema(format!(
                    "override_severity:{label}:{severity_name}"
                )));
            }
        }
    }
    Ok(())
}

fn build_rule(raw: &Value) -> PolicyResult<Rule> {
    let field = |key: &str| raw.get(key).cloned().unwrap_or(Value::Null);
    let text = |key: &str| raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let name = text("name");

    let mut tier_overrides = BTreeMap::new();
    if let Some(Value::Object(overrides)) = raw.get("tier_overrides") {
        for (tier_name, severity) in overrides {
            let tier = tier_name
                .parse::<Tier>()
                .map_err(|_| PolicyError::schema(format!("override_tier:{name}:{tier_name}")))?;
            let severity = severity
                .as_str()
                .unwrap_or_default()
                .parse::<Severity>()
                .map_err(|_| PolicyError::schema(format!("override_severity:{name}:{severity}")))?;
            tier_overrides.insert(tier, severity);
        }
    }
    let applicability: Applicability = match raw.get("applicability") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| PolicyError::schema(format!("applicability:{name}:{e}")))?,
        None => Applicability::default(),
    };

    Ok(Rule {
        enabled: field("enabled").as_bool().unwrap_or(false),
        severity: text("severity")
            .parse()
            .map_err(|_| PolicyError::schema(format!("rule_severity:{name}")))?,
        tier_overrides,
        reason: text("reason"),
        validator: text("validator")
            .parse()
            .map_err(|_| PolicyError::schema(format!("validator:{name}")))?,
        applicability,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_doc() -> Value {
        serde_json::from_str(DEFAULT_CONSTITUTION).unwrap()
    }

    fn load(doc: &Value) -> PolicyResult<ConstitutionPolicy> {
        parse_policy_document(&doc.to_string(), CONSTITUTION_VERSION)
    }

    fn schema_code(doc: &Value) -> String {
        load(doc).unwrap_err().code()
    }

    #[test]
    fn default_constitution_loads() {
        let policy = parse_policy_document(DEFAULT_CONSTITUTION, CONSTITUTION_VERSION).unwrap();
        assert_eq!(policy.rules.len(), 11);
        let rate = policy.rules.iter().find(|r| r.name == "max_mutation_rate").unwrap();
        assert_eq!(rate.tier_overrides[&Tier::Production], Severity::Blocking);
        assert_eq!(rate.tier_overrides[&Tier::Sandbox], Severity::Advisory);
        assert_eq!(policy.policy_hash, ContentHash::hash(DEFAULT_CONSTITUTION.as_bytes()));
    }

    #[test]
    fn version_mismatch_fails_closed() {
        let err = parse_policy_document(DEFAULT_CONSTITUTION, "9.9.9").unwrap_err();
        assert_eq!(err.code(), "constitution_version_mismatch:0.2.0!=9.9.9");
    }

    #[test]
    fn invalid_json_fails() {
        assert!(matches!(
            parse_policy_document("{not json", CONSTITUTION_VERSION),
            Err(PolicyError::InvalidJson(_))
        ));
        assert_eq!(
            parse_policy_document("[]", CONSTITUTION_VERSION).unwrap_err().code(),
            "constitution_policy_invalid_schema:root_not_object"
        );
    }

    #[test]
    fn tier_errors() {
        let mut doc = make_doc();
        doc["tiers"] = json!({"PRODUCTION": 0});
        assert_eq!(schema_code(&doc), "constitution_policy_invalid_schema:missing_tier:STABLE");
        doc["tiers"] = json!({"PRODUCTION": 0, "STABLE": 5, "SANDBOX": 2});
        assert_eq!(
            schema_code(&doc),
            "constitution_policy_invalid_schema:tier_value_mismatch:STABLE"
        );
    }

    #[test]
    fn severities_must_be_exact() {
        let mut doc = make_doc();
        doc["severities"] = json!(["blocking", "warning"]);
        assert_eq!(schema_code(&doc), "constitution_policy_invalid_schema:severities");
    }

    #[test]
    fn rule_errors() {
        let mut doc = make_doc();
        doc["rules"][0].as_object_mut().unwrap().remove("reason");
        assert_eq!(
            schema_code(&doc),
            "constitution_policy_invalid_schema:rule_missing_keys:0:reason"
        );

        let mut doc = make_doc();
        doc["rules"][1]["validator"] = json!("run_anything");
        assert_eq!(schema_code(&doc), "constitution_policy_invalid_schema:validator:run_anything");

        let mut doc = make_doc();
        doc["rules"][1]["tier_overrides"] = json!({"GALAXY": "blocking"});
        assert_eq!(
            schema_code(&doc),
            "constitution_policy_invalid_schema:override_tier:ast_validity:GALAXY"
        );

        let mut doc = make_doc();
        doc["rules"] = json!([]);
        assert_eq!(schema_code(&doc), "constitution_policy_invalid_schema:rules");
    }

    #[test]
    fn missing_immutability_constraints() {
        let mut doc = make_doc();
        doc.as_object_mut().unwrap().remove("immutability_constraints");
        assert_eq!(
            schema_code(&doc),
            "constitution_policy_invalid_schema:immutability_constraints"
        );
    }

    #[test]
    fn hash_tracks_raw_bytes() {
        let spaced = DEFAULT_CONSTITUTION.replace("\n", "\n ");
        let a = parse_policy_document(DEFAULT_CONSTITUTION, CONSTITUTION_VERSION).unwrap();
        let b = parse_policy_document(&spaced, CONSTITUTION_VERSION).unwrap();
        assert_eq!(a.rules, b.rules);
        assert_ne!(a.policy_hash, b.policy_hash);
    }
}
