//! Dispatcher - every way a job enters the system.
//!
//! Intake paths differ only in where the task is resolved and what source
//! the job records:
//! - `submit` / `inject`: current registry snapshot
//! - `event_completed`: current snapshot, fanned out over the outpost's tasks
//! - `chain`: the parent job's snapshot, so a reload cannot redirect a chain

use std::sync::Arc;

use parking_lot::Mutex;

use super::board::{JobBoard, Placement};
use super::ledger::JobLedger;
use super::outposts::OutpostTable;
use super::task_registry::{RegistrySnapshot, ResolvedTask, TaskRegistry};
use crate::config::OutpostConfig;
use crate::domain::{DispatchError, EventRef, Job, JobId, JobSource, JobTarget};
use crate::ports::{Clock, IdGenerator};

pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    board: Arc<JobBoard>,
    ledger: Arc<JobLedger>,
    outposts: Mutex<OutpostTable>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        board: Arc<JobBoard>,
        ledger: Arc<JobLedger>,
        outposts: OutpostTable,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            board,
            ledger,
            outposts: Mutex::new(outposts),
            ids,
            clock,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn board(&self) -> &JobBoard {
        &self.board
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Control-channel submission.
    pub fn submit(&self, task: &str, target: JobTarget) -> Result<JobId, DispatchError> {
        self.submit_as(task, target, JobSource::Control)
    }

    /// Operator-triggered run (CLI `inject`).
    pub fn inject(&self, task: &str, target: JobTarget) -> Result<JobId, DispatchError> {
        self.submit_as(task, target, JobSource::Manual)
    }

    pub fn submit_as(&self, task: &str, target: JobTarget, source: JobSource) -> Result<JobId, DispatchError> {
        let snapshot = self.registry.snapshot();
        let resolved = snapshot
            .resolve(task)
            .ok_or_else(|| DispatchError::UnknownTask(task.to_string()))?;
        self.place(resolved, snapshot, target, source, None)
    }

    /// An outpost finished recording `event`: run every subscribed task.
    pub fn event_completed(&self, event: &EventRef) -> Vec<(String, Result<JobId, DispatchError>)> {
        let tasks = self.outposts.lock().tasks_for(event).to_vec();
        if tasks.is_empty() {
            tracing::debug!(event = %event, "no subscriptions for view");
        }
        tasks
            .into_iter()
            .map(|task| {
                let result = self.submit_as(&task, JobTarget::Event(event.clone()), JobSource::Event);
                (task, result)
            })
            .collect()
    }

    /// Emit the successor of a completed job, if its task chains.
    pub fn chain(&self, parent: &Job) -> Option<Result<JobId, DispatchError>> {
        let next = parent.task.chain_target.as_deref()?;
        let snapshot = parent.snapshot.clone();
        let result = snapshot
            .resolve(next)
            .ok_or_else(|| DispatchError::UnknownTask(next.to_string()))
            .and_then(|resolved| {
                self.place(
                    resolved,
                    snapshot.clone(),
                    parent.target.clone(),
                    JobSource::Chain,
                    Some(parent.id),
                )
            });
        Some(result)
    }

    pub fn subscribe(&self, node: &str, view: &str, tasks: Vec<String>) -> Result<(), DispatchError> {
        let snapshot = self.registry.snapshot();
        if let Some(unknown) = tasks.iter().find(|t| !snapshot.contains(t)) {
            return Err(DispatchError::UnknownTask(unknown.clone()));
        }
        self.outposts.lock().subscribe(node, view, tasks);
        tracing::info!(node, view, "outpost subscription updated");
        Ok(())
    }

    pub fn outposts(&self) -> Vec<OutpostConfig> {
        self.outposts.lock().list()
    }

    /// Engine `index` lost its accelerator. Fails jobs nobody else can run.
    pub fn engine_degraded(&self, index: usize, reason: &str) {
        let stranded = self.board.mark_degraded(index, reason.to_string());
        let now = self.clock.now();
        for job in stranded {
            tracing::warn!(job_id = %job.id, task = job.task_name(), "no engine left for job");
            self.ledger.mark_failed(
                job.id,
                DispatchError::NoEligibleEngine {
                    task: job.task_name().to_string(),
                    class: job.class(),
                }
                .to_string(),
                now,
            );
        }
    }

    /// Stop accepting jobs. Accepted jobs that never started are failed.
    pub fn drain(&self) -> usize {
        let abandoned = self.board.drain();
        let now = self.clock.now();
        let count = abandoned.len();
        for job in abandoned {
            self.ledger
                .mark_failed(job.id, DispatchError::ShuttingDown.to_string(), now);
        }
        tracing::info!(abandoned = count, "dispatcher draining");
        count
    }

    fn place(
        &self,
        task: Arc<ResolvedTask>,
        snapshot: Arc<RegistrySnapshot>,
        target: JobTarget,
        source: JobSource,
        parent: Option<JobId>,
    ) -> Result<JobId, DispatchError> {
        let job = Job {
            id: self.ids.generate_job_id(),
            task,
            target,
            submitted_at: self.clock.now(),
            source,
            parent,
            snapshot,
        };
        let id = job.id;
        let task_name = job.task_name().to_string();
        let class = job.class();
        let target = job.target.clone();

        // Recorded before the board sees it; an engine may pick it up at once.
        self.ledger.record_queued(&job);
        match self.board.submit(job) {
            Ok(placement) => {
                match placement {
                    Placement::Assigned { engine } => {
                        tracing::info!(job_id = %id, task = %task_name, %class, target = %target, ?source, engine = %engine, "job assigned")
                    }
                    Placement::Queued => {
                        tracing::info!(job_id = %id, task = %task_name, %class, target = %target, ?source, "job queued")
                    }
                }
                Ok(id)
            }
            Err(err) => {
                self.ledger.discard(id);
                tracing::warn!(task = %task_name, target = %target, error = %err, "job rejected");
                Err(err)
            }
        }
    }
}
