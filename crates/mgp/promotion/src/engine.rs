//! Promotion rule evaluation.

use mgp_simulation::SimulationRunner;
use mgp_types::PromotionState;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{require_transition, PromotionResult};
use crate::policy::PromotionPolicy;
use crate::rule::{MutationData, PromotionRule};

/// Name recorded when no rule matched.
pub const DEFAULT_REJECT_RULE: &str = "default_reject";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub from: PromotionState,
    pub to: PromotionState,
    /// Matching rule, or [`DEFAULT_REJECT_RULE`].
    pub rule: String,
    pub policy_version: String,
}

impl PromotionDecision {
    pub fn matched_rule(&self) -> bool {
        self.rule != DEFAULT_REJECT_RULE
    }
}

/// Evaluates priority-ordered rules for the current state. The first rule
/// whose conditions hold decides; otherwise the mutation is rejected.
pub struct PromotionPolicyEngine {
    policy_version: String,
    /// Sorted by priority, highest first.
    rules: Vec<PromotionRule>,
    runner: SimulationRunner,
}

impl PromotionPolicyEngine {
    pub fn new(policy: PromotionPolicy) -> PromotionResult<Self> {
        policy.validate()?;
        let mut rules = policy.rules;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        info!(
            policy_version = %policy.version,
            rules = rules.len(),
            "Promotion policy loaded"
        );
        Ok(Self {
            policy_version: policy.version,
            rules,
            runner: SimulationRunner::new(),
        })
    }

    pub fn from_json(text: &str) -> PromotionResult<Self> {
        Self::new(PromotionPolicy::from_json(text)?)
    }

    pub fn with_simulation_runner(mut self, runner: SimulationRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn policy_version(&self) -> &str {
        &self.policy_version
    }

    pub fn rules_for(&self, state: PromotionState) -> impl Iterator<Item = &PromotionRule> {
        self.rules.iter().filter(move |r| r.from_state == state)
    }

    /// Decide the next state. Runs the simulation first when a candidate is
    /// present without a verdict, storing the verdict in `data`.
    pub fn evaluate_transition(
        &self,
        current: PromotionState,
        data: &mut MutationData,
    ) -> PromotionResult<PromotionDecision> {
        if data.simulation_verdict.is_none() {
            if let Some(candidate) = &data.simulation_candidate {
                let verdict = self.runner.run(candidate, true)?;
                debug!(
                    candidate = %verdict.candidate_id,
                    status = %verdict.status,
                    "Simulation run for promotion"
                );
                data.simulation_verdict = Some(verdict);
            }
        }

        let (to, rule) = match self.rules_for(current).find(|r| r.conditions.matches(data)) {
            Some(rule) => (rule.to_state, rule.name.clone()),
            None => (PromotionState::Rejected, DEFAULT_REJECT_RULE.to_string()),
        };
        require_transition(current, to)?;

        info!(from = %current, to = %to, rule = %rule, "Promotion transition decided");
        Ok(PromotionDecision {
            from: current,
            to,
            rule,
            policy_version: self.policy_version.clone(),
        })
    }
}
