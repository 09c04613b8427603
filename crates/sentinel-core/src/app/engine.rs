//! TaskEngine - lease, run, persist, chain.
//!
//! # Flow per job
//! 1. `JobBoard::lease()` hands over a job (or `None` when draining)
//! 2. build a `TaskContext` and run the executable
//! 3. write every produced result set through the data layer
//! 4. on success, emit exactly one chain job if the task chains, then
//!    mark the job succeeded; a refused successor is noted on the job's
//!    record as `chain_error`
//!
//! A failing job never takes the engine down. A device-level accelerator
//! error does: the engine reports itself degraded and stops leasing.

use std::sync::Arc;

use tracing::Instrument;

use super::context::{EngineServices, TaskContext};
use super::dispatcher::Dispatcher;
use crate::accelerator::AcceleratorBinding;
use crate::domain::{Job, ResultKey, TaskError};
use crate::ring::RingBufferPool;

pub struct TaskEngine {
    index: usize,
    name: String,
    ring_model: String,
    pool: RingBufferPool,
    accelerator: AcceleratorBinding,
    dispatcher: Arc<Dispatcher>,
    services: Arc<EngineServices>,
}

impl TaskEngine {
    /// `index` is the engine's slot on the dispatcher's board.
    pub fn new(
        index: usize,
        name: impl Into<String>,
        ring_model: impl Into<String>,
        pool: RingBufferPool,
        accelerator: AcceleratorBinding,
        dispatcher: Arc<Dispatcher>,
        services: Arc<EngineServices>,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            ring_model: ring_model.into(),
            pool,
            accelerator,
            dispatcher,
            services,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(mut self) {
        let dispatcher = self.dispatcher.clone();
        tracing::info!(engine = %self.name, accelerator = %self.accelerator.kind(), "engine started");

        while let Some(job) = dispatcher.board().lease(self.index).await {
            self.execute(job).await;

            if let Some(err) = self.accelerator.degraded() {
                let reason = err.to_string();
                tracing::error!(engine = %self.name, error = %reason, "engine degraded; no further jobs");
                dispatcher.engine_degraded(self.index, &reason);
                return;
            }
        }

        dispatcher.board().mark_stopped(self.index);
        tracing::info!(engine = %self.name, "engine stopped");
    }

    async fn execute(&mut self, job: Job) {
        let dispatcher = self.dispatcher.clone();
        let span = tracing::info_span!(
            "job",
            engine = %self.name,
            job_id = %job.id,
            task = job.task_name(),
            event = %job.target,
        );

        async {
            dispatcher.ledger().mark_running(job.id, &self.name);
            tracing::info!("job started");

            let result = self.run_job(&job).await;
            let now = self.services.clock.now();
            match result {
                Ok((keys, summary)) => {
                    // The successor is on the ledger before the parent settles.
                    match dispatcher.chain(&job) {
                        Some(Ok(next)) => tracing::debug!(next = %next, "chain job emitted"),
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "chain job rejected");
                            dispatcher.ledger().mark_chain_rejected(job.id, err.to_string());
                        }
                        None => {}
                    }
                    tracing::info!(result_keys = ?keys, "job succeeded");
                    dispatcher.ledger().mark_succeeded(job.id, keys, summary, now);
                }
                Err(err) => {
                    tracing::error!(error = %err, degrades = err.degrades_engine(), "job failed");
                    dispatcher.ledger().mark_failed(job.id, err.to_string(), now);
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_job(&mut self, job: &Job) -> Result<(Vec<ResultKey>, Option<serde_json::Value>), TaskError> {
        let output = {
            let mut ctx = TaskContext::new(
                job,
                &self.name,
                &self.ring_model,
                &self.pool,
                &mut self.accelerator,
                &self.services,
            );
            job.task
                .executable
                .run_dyn(&mut ctx, job.task.config.as_deref())
                .await?
        };

        let mut keys = Vec::with_capacity(output.result_sets.len());
        for set in output.result_sets {
            keys.push(set.key().clone());
            self.services.data.write_result_set(set).await?;
        }
        Ok((keys, output.summary))
    }
}
