//! Error types for simulation runs

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// A stage names a cohort the candidate does not carry
    #[error("simulation_unknown_cohort:{stage}:{cohort}")]
    UnknownCohort { stage: String, cohort: String },

    /// A stage definition is unusable
    #[error("simulation_invalid_stage:{stage}:{reason}")]
    InvalidStage { stage: String, reason: String },

    /// Candidate document could not be parsed
    #[error("simulation_invalid_candidate:{0}")]
    InvalidCandidate(String),

    /// Verdict could not be digested
    #[error("simulation serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SimulationResult<T> = Result<T, SimulationError>;
