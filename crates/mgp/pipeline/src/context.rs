//! The governance context: every component the pipeline consults, built
//! once at startup and shared behind an `Arc`.

use std::collections::BTreeSet;
use std::sync::Arc;

use mgp_entropy::{EntropyAccountant, MutationBudgetManager};
use mgp_law::{validate_manifest, LawError, LawManifest};
use mgp_ledger::Ledger;
use mgp_policy::{
    DelimiterBalanceCheck, PolicyEngine, PolicyError, PolicyThresholds, SourceSafetyCheck,
    DEFAULT_CONSTITUTION,
};
use mgp_promotion::{
    LegacyPromotionPolicy, PromotionPolicy, PromotionPolicyEngine, PromotionTracker,
    DEFAULT_POLICY_VERSION,
};
use mgp_sandbox::{
    ContainerIsolationBackend, IsolationBackend, IsolationMode, ProcessExecutor,
    ProcessIsolationBackend, SandboxExecutor, SandboxIsolationEnforcer,
};
use mgp_types::SignatureVerifier;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::fitness::{FitnessScorer, TestOutcomeFitness};
use crate::nonce::NonceRegistry;
use crate::pipeline::{EPOCH_CLOSED_RECORD_TYPE, EPOCH_STARTED_RECORD_TYPE};
use crate::rate::MutationRateTracker;

/// Score gate used when no promotion policy is configured.
const DEFAULT_MINIMUM_SCORE: f64 = 0.5;
const DEFAULT_RISK_CEILING: f64 = 0.65;

pub struct GovernanceContext {
    config: PipelineConfig,
    policy: RwLock<PolicyEngine>,
    entropy: EntropyAccountant,
    budget: MutationBudgetManager,
    sandbox: SandboxIsolationEnforcer,
    promotion: PromotionPolicyEngine,
    tracker: PromotionTracker,
    ledger: Arc<Ledger>,
    nonces: NonceRegistry,
    signatures: SignatureVerifier,
    source_check: Arc<dyn SourceSafetyCheck>,
    fitness: Arc<dyn FitnessScorer>,
    rates: MutationRateTracker,
    law: Mutex<Option<LawManifest>>,
    /// Epochs begun and not yet closed.
    epochs: Mutex<BTreeSet<String>>,
}

impl GovernanceContext {
    pub fn builder(config: PipelineConfig) -> GovernanceContextBuilder {
        GovernanceContextBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn policy(&self) -> RwLockReadGuard<'_, PolicyEngine> {
        self.policy.read()
    }

    pub(crate) fn policy_lock(&self) -> &RwLock<PolicyEngine> {
        &self.policy
    }

    pub fn entropy(&self) -> &EntropyAccountant {
        &self.entropy
    }

    pub fn budget(&self) -> &MutationBudgetManager {
        &self.budget
    }

    pub fn sandbox(&self) -> &SandboxIsolationEnforcer {
        &self.sandbox
    }

    pub fn promotion(&self) -> &PromotionPolicyEngine {
        &self.promotion
    }

    pub fn tracker(&self) -> &PromotionTracker {
        &self.tracker
    }

    /// The lineage ledger: one outcome entry per processed request.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn evidence_ledger(&self) -> &Arc<Ledger> {
        self.sandbox.evidence_ledger()
    }

    pub fn nonces(&self) -> &NonceRegistry {
        &self.nonces
    }

    pub fn signatures(&self) -> &SignatureVerifier {
        &self.signatures
    }

    pub fn source_check(&self) -> &Arc<dyn SourceSafetyCheck> {
        &self.source_check
    }

    pub fn fitness(&self) -> &Arc<dyn FitnessScorer> {
        &self.fitness
    }

    pub fn rates(&self) -> &MutationRateTracker {
        &self.rates
    }

    pub fn law_manifest(&self) -> Option<LawManifest> {
        self.law.lock().clone()
    }

    pub(crate) fn law_lock(&self) -> &Mutex<Option<LawManifest>> {
        &self.law
    }

    pub fn is_epoch_open(&self, epoch_id: &str) -> bool {
        self.epochs.lock().contains(epoch_id)
    }

    pub fn open_epochs(&self) -> Vec<String> {
        self.epochs.lock().iter().cloned().collect()
    }

    pub(crate) fn epochs_lock(&self) -> &Mutex<BTreeSet<String>> {
        &self.epochs
    }

    /// Validator thresholds, with the entropy limits taken from the entropy
    /// policy so both gates agree.
    pub fn thresholds(&self) -> PolicyThresholds {
        PolicyThresholds {
            max_mutation_entropy_bits: self.config.entropy.per_mutation_ceiling_bits,
            max_epoch_entropy_bits: self.config.entropy.per_epoch_ceiling_bits,
            ..self.config.thresholds.clone()
        }
    }
}

/// Builds a [`GovernanceContext`]. Anything not supplied is built from the
/// configuration.
pub struct GovernanceContextBuilder {
    config: PipelineConfig,
    policy: Option<PolicyEngine>,
    promotion: Option<PromotionPolicyEngine>,
    backend: Option<Arc<dyn IsolationBackend>>,
    executor: Option<Arc<dyn SandboxExecutor>>,
    ledger: Option<Arc<Ledger>>,
    evidence_ledger: Option<Arc<Ledger>>,
    signatures: SignatureVerifier,
    source_check: Option<Arc<dyn SourceSafetyCheck>>,
    fitness: Option<Arc<dyn FitnessScorer>>,
    law: Option<LawManifest>,
}

impl GovernanceContextBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            policy: None,
            promotion: None,
            backend: None,
            executor: None,
            ledger: None,
            evidence_ledger: None,
            signatures: SignatureVerifier::new(),
            source_check: None,
            fitness: None,
            law: None,
        }
    }

    pub fn with_policy_engine(mut self, engine: PolicyEngine) -> Self {
        self.policy = Some(engine);
        self
    }

    pub fn with_promotion_engine(mut self, engine: PromotionPolicyEngine) -> Self {
        self.promotion = Some(engine);
        self
    }

    pub fn with_isolation_backend(mut self, backend: Arc<dyn IsolationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn SandboxExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_evidence_ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.evidence_ledger = Some(ledger);
        self
    }

    /// Trusted request signers. `allow_dev_signatures` comes from the config.
    pub fn with_signature_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.signatures = verifier;
        self
    }

    pub fn with_source_check(mut self, check: Arc<dyn SourceSafetyCheck>) -> Self {
        self.source_check = Some(check);
        self
    }

    pub fn with_fitness(mut self, scorer: Arc<dyn FitnessScorer>) -> Self {
        self.fitness = Some(scorer);
        self
    }

    pub fn with_law_manifest(mut self, manifest: LawManifest) -> Self {
        self.law = Some(manifest);
        self
    }

    fn policy_engine(&mut self) -> PipelineResult<PolicyEngine> {
        let expected = &self.config.expected_constitution_version;
        let engine = match (self.policy.take(), &self.config.constitution_path) {
            (Some(engine), _) => engine,
            (None, Some(path)) => PolicyEngine::load(path, expected)?,
            (None, None) => PolicyEngine::from_document(DEFAULT_CONSTITUTION, expected)?,
        };
        if engine.version() != expected {
            return Err(PolicyError::VersionMismatch {
                found: engine.version().to_string(),
                expected: expected.clone(),
            }
            .into());
        }
        Ok(engine)
    }

    fn promotion_engine(&mut self) -> PipelineResult<PromotionPolicyEngine> {
        if let Some(engine) = self.promotion.take() {
            return Ok(engine);
        }
        if let Some(path) = &self.config.promotion_policy_path {
            let text = std::fs::read_to_string(path).map_err(|e| {
                PipelineError::Config(format!("promotion_policy:{}:{e}", path.display()))
            })?;
            return Ok(PromotionPolicyEngine::from_json(&text)?);
        }
        let rules = LegacyPromotionPolicy {
            minimum_score: DEFAULT_MINIMUM_SCORE,
            risk_ceiling: Some(DEFAULT_RISK_CEILING),
            blocked_conditions: Vec::new(),
        }
        .into_rules();
        Ok(PromotionPolicyEngine::new(PromotionPolicy::new(DEFAULT_POLICY_VERSION, rules))?)
    }

    /// Epochs the ledger shows as started and not closed.
    fn recover_epochs(ledger: &Ledger) -> BTreeSet<String> {
        let mut open = BTreeSet::new();
        for entry in ledger.entries() {
            let Some(epoch) = entry.payload.get("epoch_id").and_then(|v| v.as_str()) else {
                continue;
            };
            match entry.record_type() {
                Some(EPOCH_STARTED_RECORD_TYPE) => {
                    open.insert(epoch.to_string());
                }
                Some(EPOCH_CLOSED_RECORD_TYPE) => {
                    open.remove(epoch);
                }
                _ => {}
            }
        }
        open
    }

    fn open_ledger(path: Option<&std::path::Path>) -> PipelineResult<Arc<Ledger>> {
        Ok(Arc::new(match path {
            Some(path) => Ledger::open(path)?,
            None => Ledger::in_memory(),
        }))
    }

    pub fn build(mut self) -> PipelineResult<GovernanceContext> {
        self.config.validate()?;
        let policy = self.policy_engine()?;
        let promotion = self.promotion_engine()?;

        let ledger = match self.ledger.take() {
            Some(ledger) => ledger,
            None => Self::open_ledger(self.config.ledger_path.as_deref())?,
        };
        let evidence_ledger = match self.evidence_ledger.take() {
            Some(ledger) => ledger,
            None => Self::open_ledger(self.config.evidence_ledger_path.as_deref())?,
        };

        let backend: Arc<dyn IsolationBackend> = match self.backend.take() {
            Some(backend) => backend,
            None => match self.config.isolation {
                IsolationMode::Process => Arc::new(ProcessIsolationBackend::default()),
                IsolationMode::Container => Arc::new(ContainerIsolationBackend {
                    runtime_profile: self.config.container_runtime_profile.clone(),
                }),
            },
        };
        let executor: Arc<dyn SandboxExecutor> = match self.executor.take() {
            Some(executor) => executor,
            None => Arc::new(ProcessExecutor::new()),
        };
        let sandbox = SandboxIsolationEnforcer::new(
            self.config.sandbox_profile.clone(),
            backend,
            executor,
            evidence_ledger,
        )?
        .with_retry_limit(self.config.sandbox_retry_limit);

        if let Some(manifest) = &self.law {
            let errors = validate_manifest(manifest);
            if !errors.is_empty() {
                return Err(LawError::InvalidManifest(errors).into());
            }
        }

        let epochs = Self::recover_epochs(&ledger);
        info!(
            constitution = %policy.version(),
            policy_hash = %policy.policy_hash().short(),
            promotion_policy = %promotion.policy_version(),
            sandbox_profile = %sandbox.policy().profile_id,
            lineage_entries = ledger.len(),
            open_epochs = epochs.len(),
            "Governance context ready"
        );

        Ok(GovernanceContext {
            entropy: EntropyAccountant::new(self.config.entropy.clone()),
            budget: MutationBudgetManager::new(self.config.budget.clone())?,
            rates: MutationRateTracker::new(self.config.mutation_rate_window_secs),
            signatures: self.signatures.allow_dev_signatures(self.config.allow_dev_signatures),
            source_check: self.source_check.unwrap_or_else(|| Arc::new(DelimiterBalanceCheck)),
            fitness: self.fitness.unwrap_or_else(|| Arc::new(TestOutcomeFitness)),
            policy: RwLock::new(policy),
            promotion,
            sandbox,
            ledger,
            tracker: PromotionTracker::new(),
            nonces: NonceRegistry::new(),
            law: Mutex::new(self.law),
            epochs: Mutex::new(epochs),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let ctx = GovernanceContext::builder(PipelineConfig::default()).build().unwrap();
        assert_eq!(ctx.policy().version(), mgp_policy::CONSTITUTION_VERSION);
        assert!(ctx.ledger().is_empty());
        assert_eq!(ctx.sandbox().retry_limit(), 1);
        assert_eq!(ctx.thresholds().max_epoch_entropy_bits, 4096);
        assert_eq!(ctx.fitness().name(), "test_outcome");
    }

    #[test]
    fn mismatched_constitution_version_fails_closed() {
        let config = PipelineConfig {
            expected_constitution_version: "0.1.0".into(),
            ..PipelineConfig::default()
        };
        let err = GovernanceContext::builder(config).build().err().unwrap();
        assert_eq!(err.to_string(), "constitution_version_mismatch:0.2.0!=0.1.0");
    }

    #[test]
    fn missing_constitution_file_fails_closed() {
        let config = PipelineConfig {
            constitution_path: Some("/nonexistent/constitution.json".into()),
            ..PipelineConfig::default()
        };
        let err = GovernanceContext::builder(config).build().err().unwrap();
        assert!(err.to_string().starts_with("constitution_policy_missing:"));
    }

    #[test]
    fn file_backed_ledgers() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            ledger_path: Some(dir.path().join("lineage.jsonl")),
            evidence_ledger_path: Some(dir.path().join("evidence.jsonl")),
            ..PipelineConfig::default()
        };
        let ctx = GovernanceContext::builder(config).build().unwrap();
        ctx.ledger().append(serde_json::json!({"type": "marker"})).unwrap();
        assert_eq!(ctx.ledger().len(), 1);
        assert!(ctx.evidence_ledger().is_empty());
    }

    #[test]
    fn open_epochs_are_recovered_from_the_ledger() {
        let ledger = Arc::new(Ledger::in_memory());
        for (kind, epoch) in [
            (EPOCH_STARTED_RECORD_TYPE, "e1"),
            (EPOCH_STARTED_RECORD_TYPE, "e2"),
            (EPOCH_CLOSED_RECORD_TYPE, "e1"),
        ] {
            ledger.append(serde_json::json!({"type": kind, "epoch_id": epoch})).unwrap();
        }
        let ctx = GovernanceContext::builder(PipelineConfig::default())
            .with_ledger(ledger)
            .build()
            .unwrap();
        assert!(!ctx.is_epoch_open("e1"));
        assert!(ctx.is_epoch_open("e2"));
        assert_eq!(ctx.open_epochs(), vec!["e2".to_string()]);
    }
}
