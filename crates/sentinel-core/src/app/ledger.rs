//! JobLedger - lifecycle record of accepted jobs.
//!
//! The ledger is bounded: once it holds more than its capacity, the oldest
//! settled records are evicted. Queued and running records are never
//! evicted, so the ledger may run over capacity while that many jobs are
//! live.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::DEFAULT_LEDGER_CAPACITY;
use crate::domain::{Job, JobCounts, JobId, JobRecord, JobState, ResultKey};

pub struct JobLedger {
    records: Mutex<LedgerState>,
    settled: Notify,
    capacity: usize,
}

#[derive(Default)]
struct LedgerState {
    by_id: HashMap<JobId, JobRecord>,
    /// Submission order.
    order: VecDeque<JobId>,
}

impl LedgerState {
    /// Drop the oldest settled records until at most `capacity` remain.
    fn evict(&mut self, capacity: usize) {
        let mut excess = self.by_id.len().saturating_sub(capacity);
        if excess == 0 {
            return;
        }
        while excess > 0 {
            let Some(id) = self.order.front().copied() else {
                return;
            };
            if !self.is_settled(id) {
                break;
            }
            self.order.pop_front();
            self.by_id.remove(&id);
            excess -= 1;
        }
        if excess == 0 {
            return;
        }
        // A live job heads the queue; skip over it.
        let by_id = &mut self.by_id;
        self.order.retain(|id| {
            let settled = by_id.get(id).is_some_and(|r| r.state.is_terminal());
            if excess > 0 && settled {
                by_id.remove(id);
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    fn is_settled(&self, id: JobId) -> bool {
        self.by_id.get(&id).is_none_or(|r| r.state.is_terminal())
    }
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `capacity` is clamped to at least one record.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(LedgerState::default()),
            settled: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record_queued(&self, job: &Job) {
        let mut state = self.records.lock();
        state.order.push_back(job.id);
        state.by_id.insert(job.id, JobRecord::new(job));
        state.evict(self.capacity);
    }

    /// Forget a job the board refused.
    pub fn discard(&self, id: JobId) {
        let mut state = self.records.lock();
        state.by_id.remove(&id);
        state.order.retain(|j| *j != id);
    }

    pub fn mark_running(&self, id: JobId, engine: &str) {
        if let Some(record) = self.records.lock().by_id.get_mut(&id) {
            record.mark_running(engine);
        }
    }

    /// Note that `id` should have emitted a successor but the dispatcher refused it.
    pub fn mark_chain_rejected(&self, id: JobId, error: String) {
        if let Some(record) = self.records.lock().by_id.get_mut(&id) {
            record.chain_error = Some(error);
        }
    }

    pub fn mark_succeeded(
        &self,
        id: JobId,
        result_keys: Vec<ResultKey>,
        summary: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) {
        {
            let mut state = self.records.lock();
            if let Some(record) = state.by_id.get_mut(&id) {
                record.mark_succeeded(result_keys, summary, at);
            }
            state.evict(self.capacity);
        }
        self.settled.notify_waiters();
    }

    pub fn mark_failed(&self, id: JobId, error: String, at: DateTime<Utc>) {
        {
            let mut state = self.records.lock();
            if let Some(record) = state.by_id.get_mut(&id) {
                record.mark_failed(error, at);
            }
            state.evict(self.capacity);
        }
        self.settled.notify_waiters();
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.records.lock().by_id.get(&id).cloned()
    }

    /// All records in submission order.
    pub fn records(&self) -> Vec<JobRecord> {
        let state = self.records.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect()
    }

    /// Children of `parent` (chain hops it emitted).
    pub fn children(&self, parent: JobId) -> Vec<JobRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.parent == Some(parent))
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for record in self.records.lock().by_id.values() {
            match record.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Resolves once `id` is terminal. Returns `None` for unknown or evicted ids.
    pub async fn wait_settled(&self, id: JobId) -> Option<JobRecord> {
        loop {
            let notified = self.settled.notified();
            match self.get(id) {
                None => return None,
                Some(record) if record.state.is_terminal() => return Some(record),
                Some(_) => {}
            }
            notified.await;
        }
    }

    /// Resolves once no job is queued or running.
    pub async fn wait_idle(&self) -> JobCounts {
        loop {
            let notified = self.settled.notified();
            let counts = self.counts();
            if counts.queued == 0 && counts.running == 0 {
                return counts;
            }
            notified.await;
        }
    }
}
