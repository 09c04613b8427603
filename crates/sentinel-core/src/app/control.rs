//! Control channel - JSON request/response contract.
//!
//! One request per line, one response per line. Transport (ZeroMQ on the
//! capture host, stdin/stdout in the CLI) is the caller's business.
//!
//! ```text
//! {"op":"submit","task":"DailyCleanup","target":{"kind":"date","value":"2024-05-01"}}
//! {"op":"accepted","job_id":"01HX..."}
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::dispatcher::Dispatcher;
use super::status::{BoundDevice, HardwareStatus, StatusReport};
use crate::config::SentinelConfig;
use crate::domain::{DispatchError, EventRef, JobId, JobRecord, JobTarget};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    Submit { task: String, target: JobTarget },
    EventCompleted { event: EventRef },
    Subscribe { node: String, view: String, tasks: Vec<String> },
    Status,
    Hardware,
    Job { job_id: JobId },
    /// Re-read task definitions from a configuration file.
    Reload { path: PathBuf },
    Drain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatched {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlResponse {
    Accepted { job_id: JobId },
    Dispatched { jobs: Vec<Dispatched> },
    Status(StatusReport),
    Hardware { engines: Vec<HardwareStatus> },
    Job { record: JobRecord },
    Reloaded { version: u64 },
    Drained { abandoned: usize },
    Ok,
    Error { kind: String, message: String },
}

impl ControlResponse {
    fn error(kind: &str, message: impl ToString) -> Self {
        ControlResponse::Error {
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<DispatchError> for ControlResponse {
    fn from(err: DispatchError) -> Self {
        let kind = match &err {
            DispatchError::UnknownTask(_) => "unknown_task",
            DispatchError::NoEligibleEngine { .. } => "no_eligible_engine",
            DispatchError::ShuttingDown => "shutting_down",
        };
        ControlResponse::error(kind, err)
    }
}

#[derive(Clone)]
pub struct ControlChannel {
    dispatcher: Arc<Dispatcher>,
    devices: Arc<[BoundDevice]>,
}

impl ControlChannel {
    pub fn new(dispatcher: Arc<Dispatcher>, devices: Vec<BoundDevice>) -> Self {
        Self {
            dispatcher,
            devices: devices.into(),
        }
    }

    pub fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Submit { task, target } => match self.dispatcher.submit(&task, target) {
                Ok(job_id) => ControlResponse::Accepted { job_id },
                Err(err) => err.into(),
            },
            ControlRequest::EventCompleted { event } => {
                let jobs = self
                    .dispatcher
                    .event_completed(&event)
                    .into_iter()
                    .map(|(task, result)| match result {
                        Ok(job_id) => Dispatched {
                            task,
                            job_id: Some(job_id),
                            error: None,
                        },
                        Err(err) => Dispatched {
                            task,
                            job_id: None,
                            error: Some(err.to_string()),
                        },
                    })
                    .collect();
                ControlResponse::Dispatched { jobs }
            }
            ControlRequest::Subscribe { node, view, tasks } => {
                match self.dispatcher.subscribe(&node, &view, tasks) {
                    Ok(()) => ControlResponse::Ok,
                    Err(err) => err.into(),
                }
            }
            ControlRequest::Status => ControlResponse::Status(StatusReport::collect(&self.dispatcher)),
            ControlRequest::Hardware => ControlResponse::Hardware {
                engines: HardwareStatus::collect(&self.devices, &self.dispatcher),
            },
            ControlRequest::Job { job_id } => match self.dispatcher.ledger().get(job_id) {
                Some(record) => ControlResponse::Job { record },
                None => ControlResponse::error("unknown_job", format!("no job {job_id}")),
            },
            ControlRequest::Reload { path } => {
                let result = SentinelConfig::load(&path)
                    .and_then(|config| self.dispatcher.registry().reload(&config.tasks));
                match result {
                    Ok(version) => ControlResponse::Reloaded { version },
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "reload rejected");
                        ControlResponse::error("config", err)
                    }
                }
            }
            ControlRequest::Drain => ControlResponse::Drained {
                abandoned: self.dispatcher.drain(),
            },
        }
    }

    /// Handle one JSON line and return the JSON response line.
    pub fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<ControlRequest>(line) {
            Ok(request) => self.handle(request),
            Err(err) => ControlResponse::error("bad_request", err),
        };
        serde_json::to_string(&response).unwrap_or_else(|err| {
            format!(r#"{{"op":"error","kind":"encode","message":"{err}"}}"#)
        })
    }
}
