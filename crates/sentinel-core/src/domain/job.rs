//! Jobs and their recorded lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::class::PriorityClass;
use super::event::JobTarget;
use super::ids::JobId;
use super::results::ResultKey;
use crate::app::task_registry::{RegistrySnapshot, ResolvedTask};

/// Where a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    /// An outpost reported a completed event.
    Event,
    /// A control-channel submission.
    Control,
    /// Operator-triggered run.
    Manual,
    /// Successor of a completed job.
    Chain,
}

/// One task run against one target.
///
/// Resolution happens once, at submission: the job carries the resolved task
/// and the registry snapshot it came from, so a reload landing mid-chain
/// cannot redirect the remaining hops.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub task: Arc<ResolvedTask>,
    pub target: JobTarget,
    pub submitted_at: DateTime<Utc>,
    pub source: JobSource,
    pub parent: Option<JobId>,
    pub snapshot: Arc<RegistrySnapshot>,
}

impl Job {
    pub fn class(&self) -> PriorityClass {
        self.task.class
    }

    pub fn task_name(&self) -> &str {
        &self.task.name
    }
}

/// Job state.
///
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> Failed
///
/// Failed jobs are never retried automatically; retry is a fresh submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Ledger entry for a job. Serializable so the control channel can report it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub task: String,
    pub target: JobTarget,
    pub class: PriorityClass,
    pub source: JobSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<JobId>,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the successor this job should have emitted was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_keys: Vec<ResultKey>,
    /// Task-specific outcome, e.g. a retention report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id,
            task: job.task.name.clone(),
            target: job.target.clone(),
            class: job.class(),
            source: job.source,
            parent: job.parent,
            state: JobState::Queued,
            engine: None,
            error: None,
            chain_error: None,
            result_keys: Vec::new(),
            summary: None,
            submitted_at: job.submitted_at,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self, engine: &str) {
        self.state = JobState::Running;
        self.engine = Some(engine.to_string());
    }

    pub fn mark_succeeded(
        &mut self,
        result_keys: Vec<ResultKey>,
        summary: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) {
        self.state = JobState::Succeeded;
        self.result_keys = result_keys;
        self.summary = summary;
        self.finished_at = Some(at);
    }

    pub fn mark_failed(&mut self, error: String, at: DateTime<Utc>) {
        self.state = JobState::Failed;
        self.error = Some(error);
        self.finished_at = Some(at);
    }
}

/// Job counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}
