use std::collections::BTreeMap;
use std::fmt;

use mgp_types::MutationRequest;
use serde::{Deserialize, Serialize};

/// Bits charged per mutation op.
pub const BITS_PER_OP: u64 = 2;
/// Bits charged per distinct target.
pub const BITS_PER_TARGET: u64 = 1;
/// Flat penalty for a declared random seed.
pub const RANDOM_SEED_PENALTY_BITS: u64 = 16;

/// Named source of nondeterminism.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropySource {
    Rng,
    Clock,
    Network,
    Sandbox,
}

impl EntropySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rng => "rng",
            Self::Clock => "clock",
            Self::Network => "network",
            Self::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for EntropySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic estimate from op count, target count and seed presence.
pub fn estimate_entropy_bits(op_count: usize, target_count: usize, uses_random_seed: bool) -> u64 {
    let mut bits = op_count as u64 * BITS_PER_OP + target_count as u64 * BITS_PER_TARGET;
    if uses_random_seed {
        bits += RANDOM_SEED_PENALTY_BITS;
    }
    bits
}

/// Entropy attributed to one mutation, split by source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntropyRecord {
    pub mutation_id: String,
    pub epoch_id: String,
    /// Estimated from the request shape before execution.
    pub declared: BTreeMap<EntropySource, u64>,
    /// Measured while executing (clock reads, network, sandbox jitter).
    #[serde(default)]
    pub observed: BTreeMap<EntropySource, u64>,
}

impl EntropyRecord {
    /// Ops and targets count against `Sandbox`; a declared seed against `Rng`.
    pub fn estimate(mutation_id: &str, request: &MutationRequest) -> Self {
        let ops_and_targets = estimate_entropy_bits(request.ops.len(), request.all_targets().len(), false);
        let mut declared = BTreeMap::new();
        declared.insert(EntropySource::Sandbox, ops_and_targets);
        if request.random_seed.is_some() {
            declared.insert(EntropySource::Rng, RANDOM_SEED_PENALTY_BITS);
        }
        Self {
            mutation_id: mutation_id.to_string(),
            epoch_id: request.epoch_id.clone(),
            declared,
            observed: BTreeMap::new(),
        }
    }

    pub fn with_observed(mut self, source: EntropySource, bits: u64) -> Self {
        *self.observed.entry(source).or_default() += bits;
        self
    }

    pub fn declared_bits(&self) -> u64 {
        self.declared.values().sum()
    }

    pub fn observed_bits(&self) -> u64 {
        self.observed.values().sum()
    }

    pub fn total_bits(&self) -> u64 {
        self.declared_bits() + self.observed_bits()
    }

    /// Replay-safe when no network or sandbox jitter was observed.
    pub fn deterministic(&self) -> bool {
        [EntropySource::Network, EntropySource::Sandbox]
            .iter()
            .all(|s| self.observed.get(s).copied().unwrap_or(0) == 0)
    }

    pub fn sources(&self) -> Vec<EntropySource> {
        let mut sources: Vec<EntropySource> = self
            .declared
            .iter()
            .chain(self.observed.iter())
            .filter(|(_, bits)| **bits > 0)
            .map(|(s, _)| *s)
            .collect();
        sources.sort_unstable();
        sources.dedup();
        sources
    }
}
