//! Concurrent submission with per-agent ordering.
//!
//! Up to `size` proposals run at once. Proposals from the same agent take
//! turns on that agent's lane so nonce, rate and budget state see them one
//! at a time. A lane lives only while some submission holds it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::outcome::{PipelineOutcome, Proposal};
use crate::pipeline::MutationGovernancePipeline;

pub struct WorkerPool {
    pipeline: MutationGovernancePipeline,
    permits: Arc<Semaphore>,
    size: usize,
    lanes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WorkerPool {
    pub fn new(pipeline: MutationGovernancePipeline, size: usize) -> Self {
        let size = size.max(1);
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(size)),
            size,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Pool sized from `worker_pool_size` in the pipeline's configuration.
    pub fn from_config(pipeline: MutationGovernancePipeline) -> Self {
        let size = pipeline.context().config().worker_pool_size;
        Self::new(pipeline, size)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn pipeline(&self) -> &MutationGovernancePipeline {
        &self.pipeline
    }

    /// Lanes currently held by a queued or running submission.
    pub fn active_lanes(&self) -> usize {
        self.lanes.lock().len()
    }

    fn lane(&self, agent_id: &str) -> LaneHandle<'_> {
        let lane = self
            .lanes
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .clone();
        LaneHandle {
            pool: self,
            agent_id: agent_id.to_string(),
            lane,
        }
    }

    pub async fn submit(&self, proposal: Proposal) -> PipelineResult<PipelineOutcome> {
        let handle = self.lane(&proposal.request.agent_id);
        // Take the agent's turn first so a waiting agent holds no permit.
        let _turn = handle.lane.lock().await;
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Worker("worker pool closed".into()))?;
        debug!(
            agent_id = %proposal.request.agent_id,
            available = self.permits.available_permits(),
            "Worker slot acquired"
        );
        self.pipeline.submit(proposal).await
    }

    /// Run every proposal on its own task. Results come back in input order.
    pub async fn submit_batch(
        self: &Arc<Self>,
        proposals: Vec<Proposal>,
    ) -> Vec<PipelineResult<PipelineOutcome>> {
        let handles: Vec<_> = proposals
            .into_iter()
            .map(|proposal| {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.submit(proposal).await })
            })
            .collect();
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(PipelineError::Worker(e.to_string()))))
            .collect()
    }

    /// Stop handing out worker slots. Queued submissions fail with
    /// [`PipelineError::Worker`]; running ones finish.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A clone of an agent's lane. Dropping the last handle removes the lane
/// from the pool, cancelled submissions included.
struct LaneHandle<'a> {
    pool: &'a WorkerPool,
    agent_id: String,
    lane: Arc<AsyncMutex<()>>,
}

impl Drop for LaneHandle<'_> {
    fn drop(&mut self) {
        let mut lanes = self.pool.lanes.lock();
        // Clones are only made under this lock; the map and this handle
        // holding the only two means nobody is queued behind us.
        let idle = lanes
            .get(&self.agent_id)
            .is_some_and(|lane| Arc::ptr_eq(lane, &self.lane) && Arc::strong_count(lane) == 2);
        if idle {
            lanes.remove(&self.agent_id);
        }
    }
}
