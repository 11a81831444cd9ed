//! Evaluation context handed to every validator.
//!
//! Validators are pure functions of `(request, tier, context)`. Everything
//! they need from the rest of the system (ledger state, telemetry, budgets)
//! is collected here by the caller before evaluation starts.

use std::collections::BTreeMap;
use std::sync::Arc;

use mgp_types::{ChainStatus, SignatureVerifier};
use serde::{Deserialize, Serialize};

use crate::source_check::{DelimiterBalanceCheck, SourceSafetyCheck};

/// Tokens no mutated source may contain.
pub const DEFAULT_BANNED_TOKENS: [&str; 5] = ["eval(", "exec(", "os.system(", "__import__", "compile("];

/// Numeric limits used by the validators.
///
/// `max_complexity_delta` is the complexity growth allowed per mutation. For
/// every other limit zero disables the check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyThresholds {
    pub max_complexity_delta: i64,
    pub max_mutations_per_hour: f64,
    pub max_memory_mb: f64,
    pub max_cpu_seconds: f64,
    pub max_wall_seconds: f64,
    pub max_mutation_entropy_bits: u64,
    pub max_epoch_entropy_bits: u64,
    pub banned_tokens: Vec<String>,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            max_complexity_delta: 5,
            max_mutations_per_hour: 60.0,
            max_memory_mb: 2048.0,
            max_cpu_seconds: 30.0,
            max_wall_seconds: 60.0,
            max_mutation_entropy_bits: 128,
            max_epoch_entropy_bits: 4096,
            banned_tokens: DEFAULT_BANNED_TOKENS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Count of recent mutations for the requesting agent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationRateSnapshot {
    pub count: u64,
    pub window_secs: u64,
}

impl MutationRateSnapshot {
    pub fn rate_per_hour(&self) -> f64 {
        if self.window_secs == 0 {
            return 0.0;
        }
        self.count as f64 * 3600.0 / self.window_secs as f64
    }
}

/// Measured resource usage of the most recent run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeasurements {
    pub peak_rss_mb: f64,
    pub cpu_seconds: f64,
    pub wall_seconds: f64,
}

/// Baseline and post-mutation coverage ratios.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub baseline: Option<f64>,
    pub post: Option<f64>,
}

/// Entropy figures for the request under evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntropyReadings {
    pub declared_bits: u64,
    pub observed_bits: u64,
    /// Epoch total including this mutation.
    pub epoch_bits: u64,
}

/// Explicit, per-evaluation inputs for validators.
#[derive(Clone)]
pub struct EvaluationContext {
    pub signatures: SignatureVerifier,
    pub source_check: Arc<dyn SourceSafetyCheck>,
    pub lineage: Option<ChainStatus>,
    pub mutation_rate: Option<MutationRateSnapshot>,
    pub resources: Option<ResourceMeasurements>,
    pub coverage: CoverageSnapshot,
    pub entropy: Option<EntropyReadings>,
    /// Current (pre-mutation) source for each target, when known.
    pub baseline_sources: BTreeMap<String, String>,
    pub thresholds: PolicyThresholds,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self {
            signatures: SignatureVerifier::default(),
            source_check: Arc::new(DelimiterBalanceCheck),
            lineage: None,
            mutation_rate: None,
            resources: None,
            coverage: CoverageSnapshot::default(),
            entropy: None,
            baseline_sources: BTreeMap::new(),
            thresholds: PolicyThresholds::default(),
        }
    }
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("source_check", &self.source_check.name())
            .field("lineage", &self.lineage)
            .field("mutation_rate", &self.mutation_rate)
            .field("resources", &self.resources)
            .field("coverage", &self.coverage)
            .field("entropy", &self.entropy)
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl EvaluationContext {
    pub fn new(signatures: SignatureVerifier) -> Self {
        Self {
            signatures,
            ..Self::default()
        }
    }

    pub fn with_source_check(mut self, check: Arc<dyn SourceSafetyCheck>) -> Self {
        self.source_check = check;
        self
    }

    pub fn with_lineage(mut self, status: ChainStatus) -> Self {
        self.lineage = Some(status);
        self
    }

    pub fn with_mutation_rate(mut self, snapshot: MutationRateSnapshot) -> Self {
        self.mutation_rate = Some(snapshot);
        self
    }

    pub fn with_resources(mut self, measurements: ResourceMeasurements) -> Self {
        self.resources = Some(measurements);
        self
    }

    pub fn with_coverage(mut self, baseline: Option<f64>, post: Option<f64>) -> Self {
        self.coverage = CoverageSnapshot { baseline, post };
        self
    }

    pub fn with_entropy(mut self, readings: EntropyReadings) -> Self {
        self.entropy = Some(readings);
        self
    }

    pub fn with_baseline_source(
        mut self,
        target: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.baseline_sources.insert(target.into(), source.into());
        self
    }

    pub fn with_thresholds(mut self, thresholds: PolicyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}
