//! Pipeline configuration.
//!
//! Loaded from TOML. A missing file means defaults; a malformed one is a
//! configuration failure and nothing is substituted.

use std::path::{Path, PathBuf};

use mgp_entropy::{BudgetConfig, EntropyPolicy};
use mgp_policy::{PolicyThresholds, CONSTITUTION_VERSION};
use mgp_sandbox::{IsolationMode, SandboxPolicy};
use mgp_types::Tier;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Environment variable that forces every agent into one tier.
pub const FORCE_TIER_ENV: &str = "MGP_FORCE_TIER";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent mutations across independent agents
    pub worker_pool_size: usize,
    /// Extra sandbox attempts, each with a fresh seed
    pub sandbox_retry_limit: u32,
    /// Constitution documents declaring another version are refused
    pub expected_constitution_version: String,
    /// Constitution document; the built-in one when unset
    pub constitution_path: Option<PathBuf>,
    /// Promotion policy document; a legacy score gate when unset
    pub promotion_policy_path: Option<PathBuf>,
    pub thresholds: PolicyThresholds,
    pub entropy: EntropyPolicy,
    pub budget: BudgetConfig,
    pub sandbox_profile: SandboxPolicy,
    pub isolation: IsolationMode,
    /// Required by the container backend
    pub container_runtime_profile: Option<String>,
    /// Test command run inside the sandbox, already tokenised
    pub sandbox_command: Vec<String>,
    /// Window for the per-agent mutation rate, in seconds
    pub mutation_rate_window_secs: u64,
    pub telemetry: TelemetryConfig,
    /// Main ledger file; in memory when unset
    pub ledger_path: Option<PathBuf>,
    /// Sandbox evidence ledger file; in memory when unset
    pub evidence_ledger_path: Option<PathBuf>,
    pub forced_tier: Option<Tier>,
    pub allow_dev_signatures: bool,
    /// Law evolution certificates must be marked replay-safe
    pub require_replay_safe_law: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            sandbox_retry_limit: 1,
            expected_constitution_version: CONSTITUTION_VERSION.to_string(),
            constitution_path: None,
            promotion_policy_path: None,
            thresholds: PolicyThresholds::default(),
            entropy: EntropyPolicy::default(),
            budget: BudgetConfig::default(),
            sandbox_profile: SandboxPolicy::default_v1(),
            isolation: IsolationMode::Process,
            container_runtime_profile: None,
            sandbox_command: vec!["cargo".into(), "test".into(), "--quiet".into()],
            mutation_rate_window_secs: 3600,
            telemetry: TelemetryConfig::default(),
            ledger_path: None,
            evidence_ledger_path: None,
            forced_tier: None,
            allow_dev_signatures: false,
            require_replay_safe_law: false,
        }
    }
}

impl PipelineConfig {
    /// Local work: dev signatures accepted, verbose logs, everything in memory.
    pub fn development() -> Self {
        Self {
            worker_pool_size: 2,
            sandbox_retry_limit: 2,
            allow_dev_signatures: true,
            telemetry: TelemetryConfig {
                level: "debug".to_string(),
                ..TelemetryConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn production() -> Self {
        Self {
            worker_pool_size: 8,
            sandbox_retry_limit: 1,
            isolation: IsolationMode::Container,
            container_runtime_profile: Some("runsc.default.v1".to_string()),
            ledger_path: Some(PathBuf::from("governance/lineage.jsonl")),
            evidence_ledger_path: Some(PathBuf::from("governance/sandbox_evidence.jsonl")),
            allow_dev_signatures: false,
            require_replay_safe_law: true,
            telemetry: TelemetryConfig {
                level: "info".to_string(),
                json: true,
                with_target: true,
            },
            ..Self::default()
        }
    }

    /// Load from a TOML file. A missing file yields [`Default`].
    pub fn load(path: &Path) -> PipelineResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("read:{}:{e}", path.display())))?;
        let config = Self::from_toml(&contents)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> PipelineResult<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| PipelineError::Config(format!("toml:{e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> PipelineResult<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config(format!("toml:{e}")))
    }

    /// Apply `MGP_FORCE_TIER` from the process environment.
    pub fn apply_env(&mut self) -> PipelineResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> PipelineResult<()> {
        if let Some(value) = lookup(FORCE_TIER_ENV).filter(|v| !v.trim().is_empty()) {
            let tier = value
                .parse::<Tier>()
                .map_err(|e| PipelineError::Config(format!("{FORCE_TIER_ENV}:{e}")))?;
            self.forced_tier = Some(tier);
        }
        Ok(())
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.worker_pool_size == 0 {
            return Err(PipelineError::Config("worker_pool_size".into()));
        }
        if self.expected_constitution_version.trim().is_empty() {
            return Err(PipelineError::Config("expected_constitution_version".into()));
        }
        if self.sandbox_command.is_empty() {
            return Err(PipelineError::Config("sandbox_command".into()));
        }
        self.budget.validate()?;
        self.sandbox_profile.validate()?;
        Ok(())
    }
}
