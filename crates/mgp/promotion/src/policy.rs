//! Promotion policy documents.

use std::collections::BTreeSet;

use mgp_types::PromotionState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PromotionError, PromotionResult};
use crate::rule::{PromotionConditions, PromotionRule};

pub const DEFAULT_POLICY_VERSION: &str = "v1.0.0";

/// The older flat schema, still accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyPromotionPolicy {
    #[serde(default)]
    pub minimum_score: f64,
    #[serde(default)]
    pub risk_ceiling: Option<f64>,
    #[serde(default)]
    pub blocked_conditions: Vec<String>,
}

impl LegacyPromotionPolicy {
    /// `legacy_approve` (priority 100) and, when anything is blocked,
    /// `legacy_reject_blocked` (priority 90), both leaving CERTIFIED.
    pub fn into_rules(self) -> Vec<PromotionRule> {
        let mut rules = vec![PromotionRule::new(
            "legacy_approve",
            100,
            PromotionState::Certified,
            PromotionState::Activated,
        )
        .with_conditions(PromotionConditions {
            min_score: Some(self.minimum_score),
            max_risk_score: self.risk_ceiling,
            ..Default::default()
        })];
        if !self.blocked_conditions.is_empty() {
            rules.push(
                PromotionRule::new(
                    "legacy_reject_blocked",
                    90,
                    PromotionState::Certified,
                    PromotionState::Rejected,
                )
                .with_conditions(PromotionConditions {
                    blocked_conditions: Some(self.blocked_conditions),
                    ..Default::default()
                }),
            );
        }
        rules
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromotionPolicy {
    pub version: String,
    pub rules: Vec<PromotionRule>,
}

impl PromotionPolicy {
    pub fn new(version: impl Into<String>, rules: Vec<PromotionRule>) -> Self {
        Self {
            version: version.into(),
            rules,
        }
    }

    /// Accepts either `{version, rules: [...]}` or the legacy flat form.
    pub fn from_value(value: &Value) -> PromotionResult<Self> {
        let Some(doc) = value.as_object() else {
            return Err(PromotionError::InvalidPolicy("root_not_object".into()));
        };
        let version = ["version", "policy_id"]
            .iter()
            .find_map(|k| doc.get(*k).and_then(Value::as_str))
            .unwrap_or(DEFAULT_POLICY_VERSION)
            .to_string();
        let rules = match doc.get("rules") {
            Some(Value::Array(_)) => serde_json::from_value(doc["rules"].clone())
                .map_err(|e| PromotionError::InvalidPolicy(format!("rules:{e}")))?,
            Some(_) => return Err(PromotionError::InvalidPolicy("rules".into())),
            None => {
                let legacy: LegacyPromotionPolicy = serde_json::from_value(value.clone())
                    .map_err(|e| PromotionError::InvalidPolicy(format!("legacy:{e}")))?;
                legacy.into_rules()
            }
        };
        Ok(Self { version, rules })
    }

    pub fn from_json(text: &str) -> PromotionResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| PromotionError::InvalidPolicy(format!("invalid_json:{e}")))?;
        Self::from_value(&value)
    }

    /// Load-time checks: every rule is an edge of the lifecycle graph and no
    /// two rules leaving a state share a priority.
    pub fn validate(&self) -> PromotionResult<()> {
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            if !rule.from_state.can_transition_to(rule.to_state) {
                return Err(PromotionError::InvalidPolicy(format!(
                    "rule_transition:{}:{}->{}",
                    rule.name, rule.from_state, rule.to_state
                )));
            }
            if !seen.insert((rule.from_state, rule.priority)) {
                return Err(PromotionError::DuplicatePriority {
                    from: rule.from_state,
                    priority: rule.priority,
                });
            }
        }
        Ok(())
    }
}
