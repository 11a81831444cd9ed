//! Pipeline inputs and recorded outcomes.

use std::fmt;

use mgp_simulation::SimulationCandidate;
use mgp_types::{ContentHash, MutationRequest, PromotionState, Tier};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RejectionKind;
use crate::fitness::FitnessScore;

/// Ledger record type of a pipeline outcome.
pub const OUTCOME_RECORD_TYPE: &str = "mutation_outcome";

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Intake,
    Policy,
    Entropy,
    Budget,
    Sandbox,
    Fitness,
    Promotion,
    Ledger,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Policy => "policy",
            Self::Entropy => "entropy",
            Self::Budget => "budget",
            Self::Sandbox => "sandbox",
            Self::Fitness => "fitness",
            Self::Promotion => "promotion",
            Self::Ledger => "ledger",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Executed,
    Rejected,
    Skipped,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request plus what the promotion rules may need beyond the test run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub request: MutationRequest,
    #[serde(default)]
    pub simulation_candidate: Option<SimulationCandidate>,
    #[serde(default)]
    pub blocked_conditions: Vec<String>,
}

impl Proposal {
    pub fn new(request: MutationRequest) -> Self {
        Self {
            request,
            simulation_candidate: None,
            blocked_conditions: Vec::new(),
        }
    }

    pub fn with_simulation_candidate(mut self, candidate: SimulationCandidate) -> Self {
        self.simulation_candidate = Some(candidate);
        self
    }

    pub fn with_blocked_condition(mut self, condition: impl Into<String>) -> Self {
        self.blocked_conditions.push(condition.into());
        self
    }
}

impl From<MutationRequest> for Proposal {
    fn from(request: MutationRequest) -> Self {
        Self::new(request)
    }
}

/// What happened to one request. Every outcome is ledgered exactly once;
/// `ledger_hash` is the hash of that entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub mutation_id: String,
    pub agent_id: String,
    pub epoch_id: String,
    pub tier: Tier,
    pub status: OutcomeStatus,
    /// `ok` when executed, otherwise the rejecting stage's reason code.
    pub reason: String,
    /// Last stage reached.
    pub stage: PipelineStage,
    pub kind: Option<RejectionKind>,
    pub promotion_state: Option<PromotionState>,
    pub promotion_rule: Option<String>,
    pub evidence_hash: Option<ContentHash>,
    pub policy_digest: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub entropy_bits: Option<u64>,
    pub fitness: Option<FitnessScore>,
    pub ledger_hash: ContentHash,
}

impl PipelineOutcome {
    pub(crate) fn started(mutation_id: String, request: &MutationRequest, tier: Tier) -> Self {
        Self {
            mutation_id,
            agent_id: request.agent_id.clone(),
            epoch_id: request.epoch_id.clone(),
            tier,
            status: OutcomeStatus::Executed,
            reason: "ok".into(),
            stage: PipelineStage::Intake,
            kind: None,
            promotion_state: None,
            promotion_rule: None,
            evidence_hash: None,
            policy_digest: None,
            warnings: Vec::new(),
            entropy_bits: None,
            fitness: None,
            ledger_hash: ContentHash::zero(),
        }
    }

    pub(crate) fn reject(&mut self, stage: PipelineStage, kind: RejectionKind, reason: impl Into<String>) {
        self.status = OutcomeStatus::Rejected;
        self.stage = stage;
        self.kind = Some(kind);
        self.reason = reason.into();
    }

    pub fn is_executed(&self) -> bool {
        self.status == OutcomeStatus::Executed
    }

    pub fn is_rejected(&self) -> bool {
        self.status == OutcomeStatus::Rejected
    }

    /// The ledger payload: everything but `ledger_hash`, tagged with its type.
    pub fn to_record(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("ledger_hash");
            obj.insert("type".into(), Value::from(OUTCOME_RECORD_TYPE));
        }
        Ok(value)
    }
}
