//! JobBoard - where jobs wait for engines.
//!
//! One mutex guards every engine slot and the pending set, so moving a job
//! to an engine is a single critical section and no job can reach two
//! engines. Each engine has its own `Notify` for being woken.
//!
//! Placement on submit:
//! 1. no live engine services the class -> `NoEligibleEngine`
//! 2. first idle engine (declaration order) servicing the class gets it
//! 3. otherwise the job waits in `pending`, ordered by (class, sequence)
//!
//! An engine that becomes free takes the first pending job whose class it
//! services, so lower class numbers drain first.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::domain::{DispatchError, Job, JobId, PriorityClass};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "job", rename_all = "snake_case")]
pub enum EngineState {
    /// Thread not yet leasing.
    Starting,
    Idle,
    Running(JobId),
    /// Accelerator failed; no further jobs.
    Degraded,
    /// Finishing the current job, then stopping.
    Draining,
    Stopped,
}

impl EngineState {
    fn is_live(&self) -> bool {
        matches!(
            self,
            EngineState::Starting | EngineState::Idle | EngineState::Running(_)
        )
    }
}

/// Where `submit` put a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Assigned { engine: String },
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSlotView {
    pub name: String,
    pub classes: BTreeSet<PriorityClass>,
    pub state: EngineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

struct EngineSlot {
    name: String,
    classes: BTreeSet<PriorityClass>,
    state: EngineState,
    inbox: Option<Job>,
    degraded_reason: Option<String>,
}

impl EngineSlot {
    fn services(&self, class: PriorityClass) -> bool {
        self.classes.contains(&class)
    }
}

struct BoardState {
    engines: Vec<EngineSlot>,
    pending: BTreeMap<(PriorityClass, u64), Job>,
    next_seq: u64,
    closed: bool,
}

pub struct JobBoard {
    state: Mutex<BoardState>,
    wakers: Vec<Arc<Notify>>,
}

impl JobBoard {
    /// Slots are indexed in the order given; that order is the tie-break.
    pub fn new(engines: impl IntoIterator<Item = (String, BTreeSet<PriorityClass>)>) -> Self {
        let engines: Vec<EngineSlot> = engines
            .into_iter()
            .map(|(name, classes)| EngineSlot {
                name,
                classes,
                state: EngineState::Starting,
                inbox: None,
                degraded_reason: None,
            })
            .collect();
        let wakers = engines.iter().map(|_| Arc::new(Notify::new())).collect();
        Self {
            state: Mutex::new(BoardState {
                engines,
                pending: BTreeMap::new(),
                next_seq: 0,
                closed: false,
            }),
            wakers,
        }
    }

    pub fn engine_count(&self) -> usize {
        self.wakers.len()
    }

    pub fn index_of(&self, engine: &str) -> Option<usize> {
        self.state.lock().engines.iter().position(|e| e.name == engine)
    }

    pub fn submit(&self, job: Job) -> Result<Placement, DispatchError> {
        let class = job.class();
        let mut state = self.state.lock();
        if state.closed {
            return Err(DispatchError::ShuttingDown);
        }
        if !state.engines.iter().any(|e| e.state.is_live() && e.services(class)) {
            return Err(DispatchError::NoEligibleEngine {
                task: job.task_name().to_string(),
                class,
            });
        }

        let idle = state
            .engines
            .iter()
            .position(|e| e.state == EngineState::Idle && e.inbox.is_none() && e.services(class));
        match idle {
            Some(index) => {
                let slot = &mut state.engines[index];
                slot.state = EngineState::Running(job.id);
                slot.inbox = Some(job);
                let engine = slot.name.clone();
                drop(state);
                self.wakers[index].notify_one();
                Ok(Placement::Assigned { engine })
            }
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.pending.insert((class, seq), job);
                Ok(Placement::Queued)
            }
        }
    }

    /// Wait for the next job for engine `index`. `None` once the engine should stop.
    pub async fn lease(&self, index: usize) -> Option<Job> {
        let waker = self.wakers.get(index)?.clone();
        loop {
            {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                let slot = state.engines.get_mut(index)?;
                match slot.state {
                    EngineState::Degraded | EngineState::Stopped => return None,
                    EngineState::Draining => {
                        slot.state = EngineState::Stopped;
                        return None;
                    }
                    _ if state.closed => {
                        slot.state = EngineState::Stopped;
                        return None;
                    }
                    _ => {}
                }
                if let Some(job) = slot.inbox.take() {
                    slot.state = EngineState::Running(job.id);
                    return Some(job);
                }
                let next = state
                    .pending
                    .keys()
                    .find(|(class, _)| slot.services(*class))
                    .copied();
                if let Some(job) = next.and_then(|key| state.pending.remove(&key)) {
                    slot.state = EngineState::Running(job.id);
                    return Some(job);
                }
                slot.state = EngineState::Idle;
            }
            waker.notified().await;
        }
    }

    /// Take engine `index` out of service. Returns pending jobs that no live
    /// engine can run any more.
    pub fn mark_degraded(&self, index: usize, reason: String) -> Vec<Job> {
        let mut state = self.state.lock();
        if let Some(slot) = state.engines.get_mut(index) {
            slot.state = EngineState::Degraded;
            slot.degraded_reason = Some(reason);
        }
        let live: BTreeSet<PriorityClass> = state
            .engines
            .iter()
            .filter(|e| e.state.is_live())
            .flat_map(|e| e.classes.iter().copied())
            .collect();
        let stranded: Vec<(PriorityClass, u64)> = state
            .pending
            .keys()
            .filter(|(class, _)| !live.contains(class))
            .copied()
            .collect();
        stranded
            .into_iter()
            .filter_map(|key| state.pending.remove(&key))
            .collect()
    }

    pub fn mark_stopped(&self, index: usize) {
        if let Some(slot) = self.state.lock().engines.get_mut(index)
            && slot.state != EngineState::Degraded
        {
            slot.state = EngineState::Stopped;
        }
    }

    /// Refuse new jobs and tell every engine to stop after its current job.
    /// Returns jobs that were accepted but never started.
    pub fn drain(&self) -> Vec<Job> {
        let mut abandoned = Vec::new();
        {
            let mut state = self.state.lock();
            state.closed = true;
            for slot in &mut state.engines {
                if let Some(job) = slot.inbox.take() {
                    abandoned.push(job);
                }
                if !matches!(slot.state, EngineState::Degraded | EngineState::Stopped) {
                    slot.state = EngineState::Draining;
                }
            }
            abandoned.extend(std::mem::take(&mut state.pending).into_values());
        }
        for waker in &self.wakers {
            waker.notify_one();
        }
        abandoned
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn engines(&self) -> Vec<EngineSlotView> {
        self.state
            .lock()
            .engines
            .iter()
            .map(|e| EngineSlotView {
                name: e.name.clone(),
                classes: e.classes.clone(),
                state: e.state.clone(),
                degraded_reason: e.degraded_reason.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::time::Duration;

    fn classes(values: &[u8]) -> BTreeSet<PriorityClass> {
        values.iter().copied().filter_map(PriorityClass::new).collect()
    }

    fn board() -> JobBoard {
        JobBoard::new([
            ("Alpha".to_string(), classes(&[1])),
            ("Beta".to_string(), classes(&[1, 2])),
        ])
    }

    /// Put every engine into `Idle` by leasing once with nothing to do.
    async fn settle(board: &JobBoard) {
        for index in 0..board.engine_count() {
            let _ = tokio::time::timeout(Duration::from_millis(5), board.lease(index)).await;
        }
    }

    #[tokio::test]
    async fn first_idle_engine_in_declaration_order_wins() {
        let registry = testing::registry(&[("Fast", 1)]);
        let board = board();
        settle(&board).await;

        let placement = board.submit(testing::job(&registry, "Fast")).unwrap();
        assert_eq!(placement, Placement::Assigned { engine: "Alpha".into() });

        let placement = board.submit(testing::job(&registry, "Fast")).unwrap();
        assert_eq!(placement, Placement::Assigned { engine: "Beta".into() });

        assert_eq!(board.submit(testing::job(&registry, "Fast")).unwrap(), Placement::Queued);
    }

    #[tokio::test]
    async fn assigned_job_is_leased_by_its_engine_only() {
        let registry = testing::registry(&[("Fast", 1)]);
        let board = board();
        settle(&board).await;

        let job = testing::job(&registry, "Fast");
        let id = job.id;
        board.submit(job).unwrap();

        assert_eq!(board.lease(0).await.map(|j| j.id), Some(id));
        let other = tokio::time::timeout(Duration::from_millis(10), board.lease(1)).await;
        assert!(other.is_err(), "second engine must not see the job");
    }

    #[tokio::test]
    async fn no_engine_for_class_is_rejected() {
        let registry = testing::registry(&[("Sweep", 3)]);
        let board = board();
        let err = board.submit(testing::job(&registry, "Sweep")).unwrap_err();
        assert!(matches!(err, DispatchError::NoEligibleEngine { class, .. } if class == PriorityClass::MAINTENANCE));
    }

    #[tokio::test]
    async fn pending_jobs_drain_lowest_class_first() {
        let registry = testing::registry(&[("Fast", 1), ("Slow", 2)]);
        let board = JobBoard::new([("Beta".to_string(), classes(&[1, 2]))]);

        let slow = testing::job(&registry, "Slow");
        let fast = testing::job(&registry, "Fast");
        let (slow_id, fast_id) = (slow.id, fast.id);
        board.submit(slow).unwrap();
        board.submit(fast).unwrap();

        assert_eq!(board.lease(0).await.map(|j| j.id), Some(fast_id));
        assert_eq!(board.lease(0).await.map(|j| j.id), Some(slow_id));
    }

    #[tokio::test]
    async fn waiting_engine_is_woken_by_submit() {
        let registry = testing::registry(&[("Fast", 1)]);
        let board = Arc::new(JobBoard::new([("Alpha".to_string(), classes(&[1]))]));

        let leased = {
            let board = board.clone();
            tokio::spawn(async move { board.lease(0).await.map(|j| j.id) })
        };
        while board.engines()[0].state != EngineState::Idle {
            tokio::task::yield_now().await;
        }
        let job = testing::job(&registry, "Fast");
        let id = job.id;
        board.submit(job).unwrap();

        assert_eq!(leased.await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn degraded_engine_strands_unserviceable_jobs() {
        let registry = testing::registry(&[("Fast", 1), ("Slow", 2)]);
        let board = board();

        board.submit(testing::job(&registry, "Fast")).unwrap();
        board.submit(testing::job(&registry, "Slow")).unwrap();

        let stranded = board.mark_degraded(1, "usb reset".into());
        assert_eq!(stranded.len(), 1);
        assert_eq!(stranded[0].task_name(), "Slow");
        assert_eq!(board.pending_len(), 1);
        assert!(board.lease(1).await.is_none());

        let err = board.submit(testing::job(&registry, "Slow")).unwrap_err();
        assert!(matches!(err, DispatchError::NoEligibleEngine { .. }));
    }

    #[tokio::test]
    async fn drain_refuses_new_jobs_and_stops_engines() {
        let registry = testing::registry(&[("Fast", 1)]);
        let board = board();
        board.submit(testing::job(&registry, "Fast")).unwrap();

        let abandoned = board.drain();
        assert_eq!(abandoned.len(), 1);
        assert!(board.lease(0).await.is_none());
        assert_eq!(board.engines()[0].state, EngineState::Stopped);
        assert_eq!(
            board.submit(testing::job(&registry, "Fast")).unwrap_err(),
            DispatchError::ShuttingDown
        );
    }
}
