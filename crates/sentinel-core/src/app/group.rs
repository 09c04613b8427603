//! EngineGroup - one OS thread per engine.
//!
//! Each engine gets a dedicated thread named `engine-<name>` driving its own
//! current-thread tokio runtime, so a long inference on one accelerator never
//! stalls another engine.

use std::sync::Arc;
use std::thread;

use super::dispatcher::Dispatcher;
use super::engine::TaskEngine;
use crate::domain::EngineError;

/// Engine threads handle.
/// - `request_shutdown()` drains: engines finish the current job, then stop
/// - `join()` waits for every thread
pub struct EngineGroup {
    dispatcher: Arc<Dispatcher>,
    threads: Vec<(String, thread::JoinHandle<()>)>,
}

impl EngineGroup {
    pub fn spawn(engines: Vec<TaskEngine>, dispatcher: Arc<Dispatcher>) -> Result<Self, EngineError> {
        let mut group = Self {
            dispatcher,
            threads: Vec::with_capacity(engines.len()),
        };
        for engine in engines {
            if let Err(err) = group.spawn_one(engine) {
                group.request_shutdown();
                return Err(err);
            }
        }
        Ok(group)
    }

    fn spawn_one(&mut self, engine: TaskEngine) -> Result<(), EngineError> {
        let name = engine.name().to_string();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| EngineError::Runtime {
                engine: name.clone(),
                source,
            })?;
        let handle = thread::Builder::new()
            .name(format!("engine-{name}"))
            .spawn(move || runtime.block_on(engine.run()))
            .map_err(|source| EngineError::Spawn {
                engine: name.clone(),
                source,
            })?;
        self.threads.push((name, handle));
        Ok(())
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.threads.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Stop leasing new jobs. In-flight inference is not interrupted.
    pub fn request_shutdown(&self) -> usize {
        self.dispatcher.drain()
    }

    /// Block until every engine thread has exited.
    pub fn join(self) {
        for (name, handle) in self.threads {
            if handle.join().is_err() {
                tracing::error!(engine = %name, "engine thread panicked");
            }
        }
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if tokio::task::spawn_blocking(move || self.join()).await.is_err() {
            tracing::error!("engine join task failed");
        }
    }
}
