//! The constitutional policy engine.
//!
//! Evaluation never panics outward and never fails: a validator that panics
//! yields a failed row with reason `validator_error:<detail>`, and the
//! severity of that row decides whether it blocks.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use mgp_types::{ContentHash, MutationRequest, Severity, Tier};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::context::EvaluationContext;
use crate::document::{
    load_policy_file, parse_policy_document, ConstitutionPolicy, CONSTITUTION_VERSION,
    DEFAULT_CONSTITUTION,
};
use crate::error::PolicyResult;
use crate::rule::{Rule, RuleOutcome, ValidatorKind};
use crate::validators::run_validator;
use crate::verdict::{hash_value, EnvelopeRow, GovernanceEnvelope, PolicyVerdict, Provenance, RuleVerdict};

/// `(dependent, prerequisite)`: the dependent rule runs after its prerequisite
/// whenever both are enabled.
const RULE_DEPENDENCIES: [(ValidatorKind, ValidatorKind); 3] = [
    (ValidatorKind::MaxMutationRate, ValidatorKind::LineageContinuity),
    (ValidatorKind::TestCoverageMaintained, ValidatorKind::ResourceBounds),
    (ValidatorKind::TestCoverageMaintained, ValidatorKind::MaxComplexityDelta),
];

/// Record of a constitution hot-reload that changed the document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amendment {
    pub version: String,
    pub old_policy_hash: ContentHash,
    pub new_policy_hash: ContentHash,
}

/// Evaluates mutation requests against a loaded constitution.
#[derive(Clone, Debug)]
pub struct PolicyEngine {
    policy: ConstitutionPolicy,
    /// Enabled rules in evaluation order.
    ordered: Vec<usize>,
}

impl PolicyEngine {
    pub fn from_policy(policy: ConstitutionPolicy) -> Self {
        let ordered = evaluation_order(&policy.rules);
        Self { policy, ordered }
    }

    /// Parse a constitution document. Fails closed on any schema problem.
    pub fn from_document(text: &str, expected_version: &str) -> PolicyResult<Self> {
        Ok(Self::from_policy(parse_policy_document(text, expected_version)?))
    }

    pub fn load(path: &Path, expected_version: &str) -> PolicyResult<Self> {
        Ok(Self::from_policy(load_policy_file(path, expected_version)?))
    }

    /// Engine over the constitution shipped with this crate.
    pub fn with_default_constitution() -> PolicyResult<Self> {
        Self::from_document(DEFAULT_CONSTITUTION, CONSTITUTION_VERSION)
    }

    pub fn version(&self) -> &str {
        &self.policy.version
    }

    pub fn policy_hash(&self) -> ContentHash {
        self.policy.policy_hash
    }

    pub fn policy(&self) -> &ConstitutionPolicy {
        &self.policy
    }

    /// Enabled rules in evaluation order.
    pub fn ordered_rules(&self) -> impl Iterator<Item = &Rule> {
        self.ordered.iter().map(|&i| &self.policy.rules[i])
    }

    /// Enabled rules with their effective severity for `tier`.
    pub fn rules_for_tier(&self, tier: Tier) -> Vec<(&Rule, Severity)> {
        self.ordered_rules()
            .map(|rule| (rule, rule.severity_for(tier)))
            .collect()
    }

    /// Evaluate every enabled rule against `request`.
    pub fn evaluate(
        &self,
        request: &MutationRequest,
        tier: Tier,
        ctx: &EvaluationContext,
    ) -> PolicyVerdict {
        let mut verdicts = Vec::with_capacity(self.ordered.len());
        let mut blocking_failures = Vec::new();
        let mut warnings = Vec::new();

        for rule in self.ordered_rules() {
            let severity = rule.severity_for(tier);
            let applicable = rule.applicability.applies(request, tier);
            let outcome = if applicable {
                run_guarded(rule.validator, request, tier, ctx)
            } else {
                RuleOutcome::pass("not_applicable")
            };
            debug!(
                rule = %rule.name,
                severity = %severity,
                passed = outcome.ok,
                reason = %outcome.reason,
                "Rule evaluated"
            );
            let verdict = RuleVerdict {
                rule: rule.name.clone(),
                severity,
                passed: outcome.ok,
                applicable,
                reason: outcome.reason,
                details: outcome.details,
                provenance: Provenance::of(rule.validator),
            };
            if verdict.is_blocking_failure() {
                blocking_failures.push(verdict.rule.clone());
            } else if verdict.is_warning() {
                warnings.push(verdict.rule.clone());
            }
            verdicts.push(verdict);
        }

        let envelope = self.envelope(request, tier, &verdicts);
        let envelope_digest = match envelope.digest() {
            Ok(digest) => digest,
            Err(e) => {
                error!(error = %e, "Governance envelope could not be hashed");
                blocking_failures.push("governance_envelope".to_string());
                ContentHash::zero()
            }
        };

        let passed = blocking_failures.is_empty();
        if passed {
            info!(
                agent_id = %request.agent_id,
                tier = %tier,
                warnings = warnings.len(),
                digest = %envelope_digest.short(),
                "Policy evaluation passed"
            );
        } else {
            warn!(
                agent_id = %request.agent_id,
                tier = %tier,
                blocking = ?blocking_failures,
                "Policy evaluation blocked"
            );
        }

        PolicyVerdict {
            constitution_version: self.policy.version.clone(),
            policy_hash: self.policy.policy_hash,
            tier,
            agent_id: request.agent_id.clone(),
            epoch_id: request.epoch_id.clone(),
            passed,
            verdicts,
            blocking_failures,
            warnings,
            envelope,
            envelope_digest,
        }
    }

    /// Replace the constitution with a new document.
    ///
    /// Returns `None` when the document is byte-identical to the loaded one.
    /// On error the current constitution stays in force.
    pub fn reload(&mut self, text: &str) -> PolicyResult<Option<Amendment>> {
        let next = parse_policy_document(text, &self.policy.version)?;
        if next.policy_hash == self.policy.policy_hash {
            return Ok(None);
        }
        let amendment = Amendment {
            version: next.version.clone(),
            old_policy_hash: self.policy.policy_hash,
            new_policy_hash: next.policy_hash,
        };
        info!(
            old = %amendment.old_policy_hash.short(),
            new = %amendment.new_policy_hash.short(),
            "Constitution amended"
        );
        *self = Self::from_policy(next);
        Ok(Some(amendment))
    }

    fn envelope(
        &self,
        request: &MutationRequest,
        tier: Tier,
        verdicts: &[RuleVerdict],
    ) -> GovernanceEnvelope {
        let mut rows: Vec<EnvelopeRow> = verdicts
            .iter()
            .map(|v| EnvelopeRow {
                rule: v.rule.clone(),
                severity: v.severity,
                passed: v.passed,
                applicable: v.applicable,
                reason: v.reason.clone(),
                details_hash: hash_value(&v.details),
                provenance_hash: hash_value(&v.provenance),
            })
            .collect();
        rows.sort_by(|a, b| a.rule.cmp(&b.rule));
        GovernanceEnvelope {
            constitution_version: self.policy.version.clone(),
            policy_hash: self.policy.policy_hash,
            tier,
            tier_value: tier.value(),
            agent_id: request.agent_id.clone(),
            epoch_id: request.epoch_id.clone(),
            rows,
        }
    }
}

fn run_guarded(
    kind: ValidatorKind,
    request: &MutationRequest,
    tier: Tier,
    ctx: &EvaluationContext,
) -> RuleOutcome {
    match catch_unwind(AssertUnwindSafe(|| run_validator(kind, request, tier, ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let detail = panic_detail(payload.as_ref());
            error!(validator = %kind, detail = %detail, "Validator panicked");
            RuleOutcome::fail(format!("validator_error:{detail}"))
        }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Enabled rules in document order, moved after their prerequisites.
fn evaluation_order(rules: &[Rule]) -> Vec<usize> {
    let enabled: Vec<usize> = (0..rules.len()).filter(|&i| rules[i].enabled).collect();
    let position_of = |kind: ValidatorKind| enabled.iter().copied().find(|&i| rules[i].validator == kind);

    let mut prerequisites: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (dependent, prerequisite) in RULE_DEPENDENCIES {
        if let (Some(d), Some(p)) = (position_of(dependent), position_of(prerequisite)) {
            prerequisites.entry(d).or_default().push(p);
        }
    }

    let mut order = Vec::with_capacity(enabled.len());
    let mut remaining = enabled;
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|i| {
                prerequisites
                    .get(i)
                    .map_or(true, |ps| ps.iter().all(|p| order.contains(p)))
            })
            .unwrap_or(0);
        order.push(remaining.remove(next));
    }
    order
}
