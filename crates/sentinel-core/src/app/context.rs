//! TaskContext - what an executable sees while it runs.
//!
//! Built by the engine for one job and dropped when the job ends. Frames are
//! streamed through the engine's ring-buffer pool one `LoadedFrame` at a time;
//! a frame's buffer goes back to the pool as soon as the executable drops it.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use super::task_registry::ResolvedTask;
use crate::accelerator::{AcceleratorBinding, Inference};
use crate::config::RetentionConfig;
use crate::domain::{
    BoundingBox, DataError, EventRef, Job, JobTarget, ResultKey, TaskError, TrackingResultSet,
};
use crate::ports::{Clock, DataLayer, FrameMeta};
use crate::ring::{LoadedFrame, RingBufferPool, RingCtrl};
use crate::tasks::identity::IdentityStore;

/// Collaborators shared by every engine.
pub struct EngineServices {
    pub data: Arc<dyn DataLayer>,
    pub identity: Arc<IdentityStore>,
    pub retention: RetentionConfig,
    pub clock: Arc<dyn Clock>,
}

pub struct TaskContext<'a> {
    job: &'a Job,
    engine: &'a str,
    ring_model: &'a str,
    pool: &'a RingBufferPool,
    accelerator: &'a mut AcceleratorBinding,
    services: &'a EngineServices,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        job: &'a Job,
        engine: &'a str,
        ring_model: &'a str,
        pool: &'a RingBufferPool,
        accelerator: &'a mut AcceleratorBinding,
        services: &'a EngineServices,
    ) -> Self {
        Self {
            job,
            engine,
            ring_model,
            pool,
            accelerator,
            services,
        }
    }

    pub fn job(&self) -> &Job {
        self.job
    }

    pub fn task(&self) -> &ResolvedTask {
        &self.job.task
    }

    pub fn engine(&self) -> &str {
        self.engine
    }

    pub fn data(&self) -> &dyn DataLayer {
        self.services.data.as_ref()
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.services.identity
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.services.retention
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.services.clock.now()
    }

    pub fn input_key(&self) -> &ResultKey {
        &self.job.task.input_key
    }

    /// The job's event; date-targeted jobs are rejected.
    pub fn event(&self) -> Result<&EventRef, TaskError> {
        self.job.target.event().ok_or_else(|| TaskError::WrongTarget {
            task: self.job.task.name.clone(),
            expected: "an event",
        })
    }

    /// The job's date; event-targeted jobs are rejected.
    pub fn date(&self) -> Result<NaiveDate, TaskError> {
        match &self.job.target {
            JobTarget::Date(date) => Ok(*date),
            JobTarget::Event(_) => Err(TaskError::WrongTarget {
                task: self.job.task.name.clone(),
                expected: "a date",
            }),
        }
    }

    /// Empty result set for this job's event.
    pub fn result_set(&self, key: &str) -> Result<TrackingResultSet, TaskError> {
        Ok(TrackingResultSet::new(ResultKey::from(key), self.event()?.clone())?)
    }

    /// The upstream result set under this task's input key.
    pub async fn input(&self) -> Result<TrackingResultSet, TaskError> {
        let event = self.event()?;
        let key = self.input_key();
        self.data()
            .result_set(event, key)
            .await?
            .ok_or_else(|| DataError::NotFound(format!("result set '{key}' for {event}")).into())
    }

    /// Frames this task loads: all of them under `ringctrl = full`, only those
    /// the input references under `ringctrl = trk`.
    pub async fn frames_to_load(&self, input: Option<&TrackingResultSet>) -> Result<Vec<FrameMeta>, TaskError> {
        let frames = self.data().frames(self.event()?).await?;
        Ok(match (self.job.task.ringctrl, input) {
            (RingCtrl::Trk, Some(input)) => {
                let wanted = input.frames();
                frames
                    .into_iter()
                    .filter(|f| wanted.binary_search(&f.index).is_ok())
                    .collect()
            }
            _ => frames,
        })
    }

    /// Decode `frame` into a ring buffer, waiting for one if the pool is dry.
    pub async fn load_frame(&self, frame: &FrameMeta) -> Result<LoadedFrame, TaskError> {
        let mut handle = self.pool.acquire_for(self.ring_model, frame).await?;
        self.data()
            .decode_frame(self.event()?, frame, handle.prepare(frame))
            .await?;
        Ok(LoadedFrame {
            meta: *frame,
            handle,
        })
    }

    pub fn infer(
        &mut self,
        model: &str,
        frame: &LoadedFrame,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, TaskError> {
        Ok(self.accelerator.infer(model, &frame.view(), roi)?)
    }
}
