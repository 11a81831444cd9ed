//! Fixtures shared by the end-to-end, property and adversarial suites.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use mgp_pipeline::{
    GovernanceContext, GovernanceContextBuilder, MutationGovernancePipeline, PipelineConfig,
    StaticFitness,
};
use mgp_sandbox::ScriptedExecutor;
use mgp_types::{sign_request, MutationOp, MutationRequest, SignatureVerifier};

/// Classified as SANDBOX tier by name.
pub const SANDBOX_AGENT: &str = "test_subject-suite";
pub const EPOCH: &str = "epoch-1";

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

/// A request signed by [`signing_key`].
pub fn signed_request<I>(agent_id: &str, nonce: &str, ops: I) -> MutationRequest
where
    I: IntoIterator<Item = MutationOp>,
{
    let mut request = MutationRequest::new(agent_id, EPOCH, nonce).with_intent("suite mutation");
    for op in ops {
        request = request.with_op(op);
    }
    resign(request)
}

/// One clean single-file edit.
pub fn simple_request(nonce: &str) -> MutationRequest {
    signed_request(
        SANDBOX_AGENT,
        nonce,
        [MutationOp::replace("src/cache.py", "def get(k):\n    return k\n")],
    )
}

/// Sign again after editing a request.
pub fn resign(mut request: MutationRequest) -> MutationRequest {
    match sign_request(&signing_key(), &mut request) {
        Ok(()) => request,
        Err(e) => panic!("request must be signable: {e}"),
    }
}

/// Builder with the suite's signer trusted and a fixed passing fitness.
pub fn context_builder(config: PipelineConfig, executor: Arc<ScriptedExecutor>) -> GovernanceContextBuilder {
    GovernanceContext::builder(config)
        .with_executor(executor)
        .with_signature_verifier(SignatureVerifier::new().with_trusted_key(signing_key().verifying_key()))
        .with_fitness(Arc::new(StaticFitness::new(0.9, 0.1)))
}

/// Pipeline over `ctx` with [`EPOCH`] begun, unless the ledger already
/// shows it open.
pub fn open_pipeline(ctx: GovernanceContext) -> MutationGovernancePipeline {
    let pipeline = MutationGovernancePipeline::new(Arc::new(ctx));
    if !pipeline.context().is_epoch_open(EPOCH) {
        if let Err(e) = pipeline.begin_epoch(EPOCH, None) {
            panic!("suite epoch must begin: {e}");
        }
    }
    pipeline
}

/// Pipeline ready to process requests in [`EPOCH`].
pub fn make_pipeline(config: PipelineConfig, executor: Arc<ScriptedExecutor>) -> MutationGovernancePipeline {
    open_pipeline(build_context(config, executor))
}

/// Pipeline with no epoch begun, for tests that drive epochs themselves.
pub fn make_unopened_pipeline(
    config: PipelineConfig,
    executor: Arc<ScriptedExecutor>,
) -> MutationGovernancePipeline {
    MutationGovernancePipeline::new(Arc::new(build_context(config, executor)))
}

fn build_context(config: PipelineConfig, executor: Arc<ScriptedExecutor>) -> GovernanceContext {
    match context_builder(config, executor).build() {
        Ok(ctx) => ctx,
        Err(e) => panic!("suite context must build: {e}"),
    }
}
