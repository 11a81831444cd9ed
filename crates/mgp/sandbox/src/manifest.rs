//! Sandbox manifests and replay seeds.

use std::collections::BTreeMap;
use std::fmt;

use mgp_types::{canonical_bytes, ContentHash};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};
use crate::policy::SandboxPolicy;

pub const REPLAY_SEED_LEN: usize = 16;

/// 16 hex characters that make a sandbox run reproducible.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplaySeed(String);

impl ReplaySeed {
    /// Accepts any string; `SandboxManifest::validate` decides if it is usable.
    pub fn new(seed: impl Into<String>) -> Self {
        Self(seed.into())
    }

    pub fn from_u64(seed: u64) -> Self {
        Self(hex::encode(seed.to_be_bytes()))
    }

    /// Reproducible seed for a given attempt of a mutation.
    pub fn derive(mutation_id: &str, epoch_id: &str, attempt: u32) -> Self {
        let material = format!("{epoch_id}|{mutation_id}|{attempt}");
        let digest = ContentHash::hash(material.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest.as_bytes()[..8]);
        match u64::from_be_bytes(seed) {
            0 => Self::from_u64(1),
            n => Self::from_u64(n),
        }
    }

    /// Fresh non-zero seed from the thread RNG.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let n: u64 = rng.gen();
            if n != 0 {
                return Self::from_u64(n);
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> SandboxResult<()> {
        if self.0.len() != REPLAY_SEED_LEN {
            return Err(SandboxError::InvalidManifest("invalid_replay_seed_length".into()));
        }
        if hex::decode(&self.0).is_err() {
            return Err(SandboxError::InvalidManifest("invalid_replay_seed_hex".into()));
        }
        if self.0.bytes().all(|b| b == b'0') {
            return Err(SandboxError::InvalidManifest("invalid_replay_seed_zero".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for ReplaySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplaySeed({})", self.0)
    }
}

impl fmt::Display for ReplaySeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a sandbox run is allowed to do, declared before it starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxManifest {
    pub mutation_id: String,
    pub epoch_id: String,
    pub replay_seed: ReplaySeed,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<String>,
    pub allowed_write_paths: Vec<String>,
    pub allowed_network_hosts: Vec<String>,
    pub cpu_seconds: u64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub timeout_s: u64,
    pub deterministic_clock: bool,
    pub deterministic_random: bool,
}

impl SandboxManifest {
    /// Manifest inheriting allowlists and bounds from `policy`.
    pub fn for_policy<I, S>(
        mutation_id: impl Into<String>,
        epoch_id: impl Into<String>,
        replay_seed: ReplaySeed,
        command: I,
        policy: &SandboxPolicy,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mutation_id: mutation_id.into(),
            epoch_id: epoch_id.into(),
            replay_seed,
            command: command.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            allowed_write_paths: policy.write_path_allowlist.clone(),
            allowed_network_hosts: policy.network_egress_allowlist.clone(),
            cpu_seconds: policy.cpu_seconds,
            memory_mb: policy.memory_mb,
            disk_mb: policy.disk_mb,
            timeout_s: policy.timeout_s,
            deterministic_clock: true,
            deterministic_random: true,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_mount(mut self, path: impl Into<String>) -> Self {
        self.mounts.push(path.into());
        self
    }

    pub fn with_seed(mut self, seed: ReplaySeed) -> Self {
        self.replay_seed = seed;
        self
    }

    pub fn validate(&self) -> SandboxResult<()> {
        if self.mutation_id.trim().is_empty() || self.epoch_id.trim().is_empty() {
            return Err(SandboxError::InvalidManifest("invalid_manifest_identity".into()));
        }
        self.replay_seed.validate()?;
        if [self.cpu_seconds, self.memory_mb, self.disk_mb, self.timeout_s].contains(&0) {
            return Err(SandboxError::InvalidManifest(
                "invalid_manifest_resource_bounds".into(),
            ));
        }
        Ok(())
    }

    pub fn manifest_hash(&self) -> SandboxResult<ContentHash> {
        Ok(ContentHash::hash(&canonical_bytes(self)?))
    }
}
