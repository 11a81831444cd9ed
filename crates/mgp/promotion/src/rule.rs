//! Promotion rules, their conditions, and the data they are matched against.

use std::collections::BTreeSet;
use std::fmt;

use mgp_simulation::{SimulationCandidate, SimulationStatus, SimulationVerdict};
use mgp_types::PromotionState;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket a risk score in `[0, 1]`.
pub fn risk_tier(score: f64) -> RiskTier {
    if score >= 0.85 {
        RiskTier::Critical
    } else if score >= 0.65 {
        RiskTier::High
    } else if score >= 0.35 {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

/// Everything a promotion rule may look at.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationData {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub risk_score: f64,
    /// Derived from `risk_score` when absent.
    #[serde(default)]
    pub risk_tier: Option<RiskTier>,
    #[serde(default)]
    pub blocked_conditions: Vec<String>,
    #[serde(default)]
    pub entropy_bits: u64,
    #[serde(default)]
    pub simulation_candidate: Option<SimulationCandidate>,
    #[serde(default)]
    pub simulation_verdict: Option<SimulationVerdict>,
}

impl MutationData {
    pub fn scored(score: f64, risk_score: f64) -> Self {
        Self {
            score,
            risk_score,
            ..Self::default()
        }
    }

    pub fn with_blocked_condition(mut self, condition: impl Into<String>) -> Self {
        self.blocked_conditions.push(condition.into());
        self
    }

    pub fn with_entropy_bits(mut self, bits: u64) -> Self {
        self.entropy_bits = bits;
        self
    }

    pub fn with_simulation_candidate(mut self, candidate: SimulationCandidate) -> Self {
        self.simulation_candidate = Some(candidate);
        self
    }

    pub fn with_simulation_verdict(mut self, verdict: SimulationVerdict) -> Self {
        self.simulation_verdict = Some(verdict);
        self
    }

    pub fn effective_risk_tier(&self) -> RiskTier {
        self.risk_tier.unwrap_or_else(|| risk_tier(self.risk_score))
    }
}

/// Conditions of one rule. Absent conditions always hold.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PromotionConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_risk_score: Option<f64>,
    /// When present, decides the match on its own: the rule matches iff the
    /// mutation carries one of these conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_conditions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tiers: Option<Vec<RiskTier>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entropy_bits: Option<u64>,
    #[serde(default)]
    pub require_simulation_pass: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub simulation_status_in: Vec<SimulationStatus>,
}

impl PromotionConditions {
    pub fn matches(&self, data: &MutationData) -> bool {
        if let Some(min) = self.min_score {
            if data.score < min {
                return false;
            }
        }
        if let Some(max) = self.max_risk_score {
            if data.risk_score > max {
                return false;
            }
        }
        if let Some(blocked) = &self.blocked_conditions {
            let observed: BTreeSet<&str> = data.blocked_conditions.iter().map(String::as_str).collect();
            return blocked.iter().any(|c| observed.contains(c.as_str()));
        }
        if let Some(tiers) = &self.risk_tiers {
            if !tiers.contains(&data.effective_risk_tier()) {
                return false;
            }
        }
        if let Some(max_bits) = self.max_entropy_bits {
            if data.entropy_bits > max_bits {
                return false;
            }
        }
        if self.require_simulation_pass
            && !data.simulation_verdict.as_ref().is_some_and(|v| v.passed)
        {
            return false;
        }
        if !self.simulation_status_in.is_empty() {
            match &data.simulation_verdict {
                Some(v) if self.simulation_status_in.contains(&v.status) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromotionRule {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    pub from_state: PromotionState,
    pub to_state: PromotionState,
    #[serde(default)]
    pub conditions: PromotionConditions,
}

impl PromotionRule {
    pub fn new(
        name: impl Into<String>,
        priority: i64,
        from_state: PromotionState,
        to_state: PromotionState,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            from_state,
            to_state,
            conditions: PromotionConditions::default(),
        }
    }

    pub fn with_conditions(mut self, conditions: PromotionConditions) -> Self {
        self.conditions = conditions;
        self
    }
}
