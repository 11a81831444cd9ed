use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use mgp_types::{MutationRequest, Severity, Tier};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Validator Kinds ─────────────────────────────────────────────────────

/// The closed set of rule validators a constitution may reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    SingleFileScope,
    AstValidity,
    ImportSmokeTest,
    SignatureRequired,
    NoBannedTokens,
    LineageContinuity,
    MaxComplexityDelta,
    TestCoverageMaintained,
    MaxMutationRate,
    ResourceBounds,
    EntropyBudgetLimit,
}

impl ValidatorKind {
    pub const ALL: [ValidatorKind; 11] = [
        Self::SingleFileScope,
        Self::AstValidity,
        Self::ImportSmokeTest,
        Self::SignatureRequired,
        Self::NoBannedTokens,
        Self::LineageContinuity,
        Self::MaxComplexityDelta,
        Self::TestCoverageMaintained,
        Self::MaxMutationRate,
        Self::ResourceBounds,
        Self::EntropyBudgetLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleFileScope => "single_file_scope",
            Self::AstValidity => "ast_validity",
            Self::ImportSmokeTest => "import_smoke_test",
            Self::SignatureRequired => "signature_required",
            Self::NoBannedTokens => "no_banned_tokens",
            Self::LineageContinuity => "lineage_continuity",
            Self::MaxComplexityDelta => "max_complexity_delta",
            Self::TestCoverageMaintained => "test_coverage_maintained",
            Self::MaxMutationRate => "max_mutation_rate",
            Self::ResourceBounds => "resource_bounds",
            Self::EntropyBudgetLimit => "entropy_budget_limit",
        }
    }

    /// Implementation version, part of each verdict row's provenance.
    pub fn version(&self) -> &'static str {
        match self {
            Self::LineageContinuity | Self::MaxMutationRate => "2.1.0",
            Self::MaxComplexityDelta | Self::TestCoverageMaintained | Self::ResourceBounds => {
                "1.1.0"
            }
            _ => "1.0.0",
        }
    }
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown validator: {s}"))
    }
}

// ── Rule Outcome ────────────────────────────────────────────────────────

/// What a validator reports for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub ok: bool,
    pub reason: String,
    #[serde(default)]
    pub details: Value,
}

impl RuleOutcome {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            reason: reason.into(),
            details: Value::Null,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

// ── Applicability ───────────────────────────────────────────────────────

/// Optional scoping of a rule to tiers and path prefixes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applicability {
    /// Tiers the rule applies to. Empty means every tier.
    #[serde(default)]
    pub tiers: Vec<Tier>,
    /// The rule applies when any target sits under one of these prefixes.
    /// Empty means every target.
    #[serde(default)]
    pub path_prefixes: Vec<String>,
}

impl Applicability {
    pub fn applies(&self, request: &MutationRequest, tier: Tier) -> bool {
        if !self.tiers.is_empty() && !self.tiers.contains(&tier) {
            return false;
        }
        if self.path_prefixes.is_empty() {
            return true;
        }
        request.all_targets().iter().any(|target| {
            self.path_prefixes
                .iter()
                .any(|p| *target == p.trim_end_matches('/') || target.starts_with(p.as_str()))
        })
    }
}

// ── Rule ────────────────────────────────────────────────────────────────

/// A constitutional rule. Immutable once loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub enabled: bool,
    pub severity: Severity,
    #[serde(default)]
    pub tier_overrides: BTreeMap<Tier, Severity>,
    pub reason: String,
    pub validator: ValidatorKind,
    #[serde(default)]
    pub applicability: Applicability,
}

impl Rule {
    /// Severity for a tier, falling back to the rule's own severity.
    pub fn severity_for(&self, tier: Tier) -> Severity {
        self.tier_overrides
            .get(&tier)
            .copied()
            .unwrap_or(self.severity)
    }
}
