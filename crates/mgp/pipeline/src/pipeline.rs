//! The mutation governance pipeline.
//!
//! Stages run in a fixed order and the first rejection ends the run:
//!
//! ```text
//! intake ─► policy ─► entropy ─► budget ─► sandbox ─► fitness ─► promotion ─► ledger
//! ```
//!
//! Whatever happens, the outcome is appended to the lineage ledger exactly
//! once before it is returned.

use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use mgp_entropy::{BudgetRequest, EntropyDecision};
use mgp_law::{
    epoch_law_transition_metadata, validate_law_transition, validate_manifest, LawError,
    LawEvolutionCertificate, LawManifest,
};
use mgp_ledger::{EpochReplay, LedgerEntry};
use mgp_policy::{Amendment, EntropyReadings, EvaluationContext};
use mgp_promotion::MutationData;
use mgp_sandbox::{SandboxJob, SandboxRun};
use mgp_types::{determine_tier, ContentHash, MutationRequest, PromotionState};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::context::GovernanceContext;
use crate::error::{PipelineError, PipelineResult, RejectionKind};
use crate::nonce::NONCE_REPLAY;
use crate::outcome::{OutcomeStatus, PipelineOutcome, PipelineStage, Proposal};

pub const SIGNATURE_MISSING: &str = "signature_missing";
pub const NOOP: &str = "noop";
pub const SANDBOX_CERTIFIED_RULE: &str = "sandbox_certified";
/// The lineage ledger no longer verifies; no tier may mutate on top of it.
pub const LINEAGE_CONTINUITY_FAILED: &str = "lineage_continuity_failed";

pub const POLICY_AMENDMENT_RECORD_TYPE: &str = "policy_amendment";
pub const EPOCH_STARTED_RECORD_TYPE: &str = "epoch_started";
pub const EPOCH_CLOSED_RECORD_TYPE: &str = "epoch_closed";
pub const REPLAY_VERIFICATION_RECORD_TYPE: &str = "replay_verification";

/// The request names no epoch.
pub const MISSING_EPOCH: &str = "missing_epoch";
/// The request's epoch was never begun, or is already closed.
pub const EPOCH_NOT_STARTED: &str = "epoch_not_started";
pub const EPOCH_ALREADY_OPEN: &str = "epoch_already_open";

/// Law carried into a new epoch.
#[derive(Clone, Debug)]
pub struct EpochLaw {
    pub manifest: LawManifest,
    pub certificate: Option<LawEvolutionCertificate>,
    /// Checks the certificate signature when present.
    pub signer: Option<VerifyingKey>,
}

impl EpochLaw {
    pub fn new(manifest: LawManifest) -> Self {
        Self {
            manifest,
            certificate: None,
            signer: None,
        }
    }

    pub fn with_certificate(mut self, certificate: LawEvolutionCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    pub fn with_signer(mut self, key: VerifyingKey) -> Self {
        self.signer = Some(key);
        self
    }
}

/// Drives one request at a time through every governance stage.
///
/// Cheap to clone; all state lives in the shared [`GovernanceContext`].
#[derive(Clone)]
pub struct MutationGovernancePipeline {
    ctx: Arc<GovernanceContext>,
}

impl MutationGovernancePipeline {
    pub fn new(ctx: Arc<GovernanceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<GovernanceContext> {
        &self.ctx
    }

    pub async fn process(&self, request: MutationRequest) -> PipelineResult<PipelineOutcome> {
        self.submit(Proposal::new(request)).await
    }

    pub async fn submit(&self, proposal: Proposal) -> PipelineResult<PipelineOutcome> {
        self.submit_with(proposal, &SandboxRun::new()).await
    }

    /// Run `proposal` with a caller-held cancellation handle for the sandbox.
    ///
    /// Returns `Err` only when the outcome could not be ledgered.
    pub async fn submit_with(
        &self,
        proposal: Proposal,
        run: &SandboxRun,
    ) -> PipelineResult<PipelineOutcome> {
        let request = &proposal.request;
        let mutation_id = request.mutation_id()?;
        let tier = determine_tier(&request.agent_id, self.ctx.config().forced_tier);
        let mut outcome = PipelineOutcome::started(mutation_id, request, tier);

        if let Err(e) = self.run_stages(&proposal, &mut outcome, run).await {
            error!(
                mutation_id = %outcome.mutation_id,
                stage = %outcome.stage,
                error = %e,
                "Pipeline stage failed"
            );
            let stage = outcome.stage;
            outcome.reject(stage, e.kind(), format!("internal_error:{e}"));
        }
        self.settle_promotion(&mut outcome);
        self.record(&mut outcome)?;
        Ok(outcome)
    }

    async fn run_stages(
        &self,
        proposal: &Proposal,
        outcome: &mut PipelineOutcome,
        run: &SandboxRun,
    ) -> PipelineResult<()> {
        let ctx = &self.ctx;
        let request = &proposal.request;
        let mutation_id = outcome.mutation_id.clone();

        // ── Intake ──────────────────────────────────────────────────────
        // Epochs first: nonces are only kept for epochs that will be closed.
        if request.epoch_id.trim().is_empty() {
            outcome.reject(PipelineStage::Intake, RejectionKind::ReplayProtection, MISSING_EPOCH);
            return Ok(());
        }
        if !ctx.is_epoch_open(&request.epoch_id) {
            outcome.reject(PipelineStage::Intake, RejectionKind::ReplayProtection, EPOCH_NOT_STARTED);
            return Ok(());
        }
        if !ctx.nonces().register(request) {
            outcome.reject(PipelineStage::Intake, RejectionKind::ReplayProtection, NONCE_REPLAY);
            return Ok(());
        }
        if request.is_noop() {
            outcome.status = OutcomeStatus::Skipped;
            outcome.reason = NOOP.into();
            return Ok(());
        }
        if request.signature.trim().is_empty() {
            outcome.reject(PipelineStage::Intake, RejectionKind::ReplayProtection, SIGNATURE_MISSING);
            return Ok(());
        }
        match ctx.tracker().propose(&mutation_id, &request.epoch_id) {
            Ok(state) => outcome.promotion_state = Some(state),
            Err(e) => {
                outcome.reject(PipelineStage::Intake, RejectionKind::PromotionRejected, e.to_string());
                return Ok(());
            }
        }

        // ── Policy ──────────────────────────────────────────────────────
        outcome.stage = PipelineStage::Policy;
        let lineage = ctx.ledger().verify_chain();
        if !lineage.ok {
            error!(
                mutation_id = %mutation_id,
                first_broken_index = ?lineage.first_broken_index,
                reason = ?lineage.reason,
                "Lineage ledger does not verify"
            );
            outcome.reject(
                PipelineStage::Policy,
                RejectionKind::LedgerIntegrityFailure,
                LINEAGE_CONTINUITY_FAILED,
            );
            return Ok(());
        }
        let record = ctx.entropy().estimate(&mutation_id, request);
        let preview = ctx
            .entropy()
            .preview(&request.epoch_id, record.declared_bits(), record.observed_bits());
        let eval_ctx = EvaluationContext::new(ctx.signatures().clone())
            .with_source_check(ctx.source_check().clone())
            .with_lineage(lineage)
            .with_mutation_rate(ctx.rates().snapshot(&request.agent_id, Utc::now()))
            .with_entropy(EntropyReadings {
                declared_bits: preview.declared_bits,
                observed_bits: preview.observed_bits,
                epoch_bits: preview.epoch_bits,
            })
            .with_thresholds(ctx.thresholds());
        let verdict = ctx.policy().evaluate(request, outcome.tier, &eval_ctx);
        outcome.policy_digest = Some(verdict.envelope_digest);
        outcome.warnings = verdict.warnings.clone();
        if let Some(reason) = verdict.rejection_reason() {
            outcome.reject(PipelineStage::Policy, RejectionKind::PolicyViolation, reason);
            return Ok(());
        }

        // ── Entropy ─────────────────────────────────────────────────────
        outcome.stage = PipelineStage::Entropy;
        let entropy = ctx.entropy().enforce_record(&record);
        outcome.entropy_bits = Some(entropy.mutation_bits);
        if !entropy.passed {
            outcome.reject(
                PipelineStage::Entropy,
                RejectionKind::EntropyCeilingExceeded,
                entropy.reason.clone(),
            );
            return Ok(());
        }

        // ── Budget ──────────────────────────────────────────────────────
        outcome.stage = PipelineStage::Budget;
        let budget = ctx.budget().evaluate(&self.budget_request(&mutation_id, request, &entropy));
        if !budget.accepted {
            outcome.reject(PipelineStage::Budget, RejectionKind::BudgetExceeded, budget.reason);
            return Ok(());
        }

        // ── Sandbox ─────────────────────────────────────────────────────
        outcome.stage = PipelineStage::Sandbox;
        let mut job = SandboxJob::new(
            mutation_id.clone(),
            request.epoch_id.clone(),
            ctx.config().sandbox_command.clone(),
        );
        if let Some(seed) = request.random_seed {
            job = job.with_seed(seed);
        }
        let sandbox = match ctx.sandbox().run_with_retry(&job, run).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                outcome.reject(PipelineStage::Sandbox, RejectionKind::SandboxViolation, e.code());
                return Ok(());
            }
        };
        outcome.evidence_hash = Some(*sandbox.evidence_hash());
        if !sandbox.passed() {
            outcome.reject(PipelineStage::Sandbox, RejectionKind::SandboxViolation, sandbox.reason());
            return Ok(());
        }

        // ── Fitness ─────────────────────────────────────────────────────
        outcome.stage = PipelineStage::Fitness;
        let fitness = ctx.fitness().score(request, &sandbox.report);
        outcome.fitness = Some(fitness);
        debug!(
            mutation_id = %mutation_id,
            scorer = ctx.fitness().name(),
            score = fitness.score,
            risk = fitness.risk_score,
            "Fitness scored"
        );

        // ── Promotion ───────────────────────────────────────────────────
        outcome.stage = PipelineStage::Promotion;
        let version = ctx.promotion().policy_version().to_string();
        ctx.tracker()
            .advance(&mutation_id, PromotionState::Certified, SANDBOX_CERTIFIED_RULE, &version)?;
        outcome.promotion_state = Some(PromotionState::Certified);

        let mut data = MutationData::scored(fitness.score, fitness.risk_score)
            .with_entropy_bits(entropy.mutation_bits);
        data.blocked_conditions = proposal.blocked_conditions.clone();
        data.simulation_candidate = proposal.simulation_candidate.clone();
        let decision = match ctx.promotion().evaluate_transition(PromotionState::Certified, &mut data) {
            Ok(decision) => decision,
            Err(e) => {
                outcome.reject(PipelineStage::Promotion, RejectionKind::PromotionRejected, e.to_string());
                return Ok(());
            }
        };
        ctx.tracker()
            .advance(&mutation_id, decision.to, &decision.rule, &decision.policy_version)?;
        outcome.promotion_state = Some(decision.to);
        outcome.promotion_rule = Some(decision.rule.clone());
        if decision.to == PromotionState::Rejected {
            outcome.reject(
                PipelineStage::Promotion,
                RejectionKind::PromotionRejected,
                format!("promotion_rejected:{}", decision.rule),
            );
            return Ok(());
        }

        outcome.stage = PipelineStage::Ledger;
        ctx.rates().record(&request.agent_id, Utc::now());
        Ok(())
    }

    /// Cost components in the budget's units: ops run, share of the
    /// per-mutation entropy ceiling used, and targets touched.
    fn budget_request(
        &self,
        mutation_id: &str,
        request: &MutationRequest,
        entropy: &EntropyDecision,
    ) -> BudgetRequest {
        let ceiling = self.ctx.entropy().policy().per_mutation_ceiling_bits;
        let entropy_delta = if ceiling == 0 {
            0.0
        } else {
            entropy.mutation_bits as f64 / ceiling as f64
        };
        BudgetRequest {
            cycle_id: mutation_id.to_string(),
            epoch_id: request.epoch_id.clone(),
            runtime_cost: request.ops.len() as f64,
            entropy_delta,
            complexity_delta: request.all_targets().len() as f64,
            fitness_gain: self.ctx.fitness().expected_gain(request),
        }
    }

    /// A rejected mutation that was proposed ends in `REJECTED`.
    fn settle_promotion(&self, outcome: &mut PipelineOutcome) {
        if !outcome.is_rejected() {
            return;
        }
        let Some(state) = outcome.promotion_state else {
            return;
        };
        if state.is_terminal() {
            return;
        }
        let rule = format!("{}_rejected", outcome.stage);
        match self.ctx.tracker().advance(
            &outcome.mutation_id,
            PromotionState::Rejected,
            &rule,
            self.ctx.promotion().policy_version(),
        ) {
            Ok(_) => {
                outcome.promotion_state = Some(PromotionState::Rejected);
                outcome.promotion_rule = Some(rule);
            }
            Err(e) => warn!(
                mutation_id = %outcome.mutation_id,
                error = %e,
                "Could not settle promotion state"
            ),
        }
    }

    /// Outcomes of an open epoch extend its digest chain.
    fn record(&self, outcome: &mut PipelineOutcome) -> PipelineResult<()> {
        let record = outcome.to_record()?;
        let entry = if self.ctx.is_epoch_open(&outcome.epoch_id) {
            self.ctx.ledger().append_bundle(&outcome.epoch_id, record)?
        } else {
            self.ctx.ledger().append(record)?
        };
        outcome.ledger_hash = entry.hash;
        if outcome.is_rejected() {
            warn!(
                mutation_id = %outcome.mutation_id,
                agent_id = %outcome.agent_id,
                stage = %outcome.stage,
                reason = %outcome.reason,
                "Mutation rejected"
            );
        } else {
            info!(
                mutation_id = %outcome.mutation_id,
                agent_id = %outcome.agent_id,
                status = %outcome.status,
                tier = %outcome.tier,
                ledger_hash = %entry.hash.short(),
                "Mutation recorded"
            );
        }
        Ok(())
    }

    /// Hot-reload the constitution. A changed document is ledgered as an
    /// amendment; an identical one returns `None` and records nothing.
    pub fn amend_policy(&self, document: &str) -> PipelineResult<Option<Amendment>> {
        let mut engine = self.ctx.policy_lock().write();
        let Some(amendment) = engine.reload(document)? else {
            return Ok(None);
        };
        self.ctx.ledger().append(json!({
            "type": POLICY_AMENDMENT_RECORD_TYPE,
            "version": amendment.version,
            "old_policy_hash": amendment.old_policy_hash,
            "new_policy_hash": amendment.new_policy_hash,
        }))?;
        info!(
            version = %amendment.version,
            policy_hash = %amendment.new_policy_hash.short(),
            "Constitution amended"
        );
        Ok(Some(amendment))
    }

    /// Open an epoch, optionally under new law.
    ///
    /// The first manifest is accepted on validation alone. Replacing one
    /// requires a valid law transition; a rejected transition leaves the
    /// current law in place and records nothing.
    pub fn begin_epoch(&self, epoch_id: &str, law: Option<EpochLaw>) -> PipelineResult<LedgerEntry> {
        if epoch_id.trim().is_empty() {
            return Err(PipelineError::Epoch(MISSING_EPOCH.into()));
        }
        let mut current = self.ctx.law_lock().lock();
        let mut epochs = self.ctx.epochs_lock().lock();
        if epochs.contains(epoch_id) {
            return Err(PipelineError::Epoch(EPOCH_ALREADY_OPEN.into()));
        }
        let metadata = match law {
            None => epoch_law_transition_metadata(current.as_ref(), None)?,
            Some(law) => {
                let errors = validate_manifest(&law.manifest);
                if !errors.is_empty() {
                    return Err(LawError::InvalidManifest(errors).into());
                }
                if law.manifest.epoch_id != epoch_id {
                    return Err(PipelineError::LawTransition(vec![format!(
                        "manifest epoch {} does not match epoch {epoch_id}",
                        law.manifest.epoch_id
                    )]));
                }
                if current.is_some() {
                    let errors = validate_law_transition(
                        current.as_ref(),
                        Some(&law.manifest),
                        law.certificate.as_ref(),
                        self.ctx.config().require_replay_safe_law,
                        law.signer.as_ref(),
                    )?;
                    if !errors.is_empty() {
                        warn!(epoch_id, errors = ?errors, "Law transition refused");
                        return Err(PipelineError::LawTransition(errors));
                    }
                }
                let metadata = epoch_law_transition_metadata(Some(&law.manifest), law.certificate.as_ref())?;
                *current = Some(law.manifest);
                metadata
            }
        };
        let entry = self.ctx.ledger().append(json!({
            "type": EPOCH_STARTED_RECORD_TYPE,
            "epoch_id": epoch_id,
            "law": metadata,
        }))?;
        epochs.insert(epoch_id.to_string());
        info!(epoch_id, law = ?metadata.get("law_surface_digest"), "Epoch started");
        Ok(entry)
    }

    /// Release an epoch's entropy, budget and nonce state.
    ///
    /// The closing record checkpoints the epoch digest next to the digest
    /// replayed from the bundles' content.
    pub fn close_epoch(&self, epoch_id: &str) -> PipelineResult<LedgerEntry> {
        let mut epochs = self.ctx.epochs_lock().lock();
        if !epochs.contains(epoch_id) {
            return Err(PipelineError::Epoch(EPOCH_NOT_STARTED.into()));
        }
        let replay = self.ctx.ledger().replay_epoch(epoch_id)?;
        let entropy_bits = self.ctx.entropy().epoch_bits(epoch_id);
        self.ctx.entropy().reset_epoch(epoch_id);
        self.ctx.budget().reset_epoch(epoch_id);
        self.ctx.nonces().forget_epoch(epoch_id);
        let entry = self.ctx.ledger().append(json!({
            "type": EPOCH_CLOSED_RECORD_TYPE,
            "epoch_id": epoch_id,
            "entropy_bits": entropy_bits,
            "bundles": replay.bundles,
            "epoch_digest": replay.expected.unwrap_or_else(ContentHash::zero),
            "replay_digest": replay.replayed,
            "replay_passed": replay.passed,
        }))?;
        epochs.remove(epoch_id);
        info!(
            epoch_id,
            entropy_bits,
            bundles = replay.bundles,
            replay_passed = replay.passed,
            "Epoch closed"
        );
        Ok(entry)
    }

    /// Replay `epoch_id`'s digest chain and ledger the verdict.
    pub fn verify_epoch(&self, epoch_id: &str) -> PipelineResult<EpochReplay> {
        if epoch_id.trim().is_empty() {
            return Err(PipelineError::Epoch(MISSING_EPOCH.into()));
        }
        let replay = self.ctx.ledger().replay_epoch(epoch_id)?;
        self.ctx.ledger().append(json!({
            "type": REPLAY_VERIFICATION_RECORD_TYPE,
            "epoch_id": epoch_id,
            "bundles": replay.bundles,
            "epoch_digest": replay.expected.unwrap_or_else(ContentHash::zero),
            "replay_digest": replay.replayed,
            "replay_passed": replay.passed,
        }))?;
        if replay.passed {
            info!(epoch_id, bundles = replay.bundles, "Epoch replay verified");
        } else {
            error!(epoch_id, bundles = replay.bundles, "Epoch replay diverged");
        }
        Ok(replay)
    }
}
