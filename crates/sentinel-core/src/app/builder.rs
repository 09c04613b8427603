//! SentinelBuilder - assemble and start the engine set.
//!
//! Everything that can be checked before a thread starts is checked here:
//! - configuration structure (engines, ring models, outposts)
//! - task registry (aliases, chains, classes, executables)
//! - every task's parameter file parses
//! - the identity baselines load
//! - every engine's accelerator binds
//!
//! Any failure aborts startup with nothing running.

use std::sync::Arc;

use super::board::JobBoard;
use super::context::EngineServices;
use super::control::ControlChannel;
use super::dispatcher::Dispatcher;
use super::engine::TaskEngine;
use super::group::EngineGroup;
use super::ledger::JobLedger;
use super::outposts::OutpostTable;
use super::status::{BoundDevice, HardwareStatus, StatusReport};
use super::task_registry::{RegistrySnapshot, TaskRegistry};
use crate::accelerator::AcceleratorBinding;
use crate::config::SentinelConfig;
use crate::domain::{
    ConfigError, DispatchError, EngineError, EventRef, JobCounts, JobId, JobRecord, JobTarget,
    SentinelError,
};
use crate::impls::SysfsProbe;
use crate::ports::{Clock, DataLayer, DeviceProbe, IdGenerator, RuntimeProvider, SystemClock, UlidGenerator};
use crate::ring::{RingBufferModel, RingBufferPool};
use crate::tasks::{IdentityStore, register_builtins};
use crate::typed::{Executable, ExecutableRegistry, RegistryError};

/// # Example
/// ```ignore
/// let config = SentinelConfig::load("sentinel.toml")?;
/// let sentinel = SentinelBuilder::new(config, data_layer, runtimes)
///     .register(MyExecutable)?
///     .build()?;
/// let job = sentinel.dispatcher().submit("GetFaces", event.into())?;
/// ```
pub struct SentinelBuilder {
    config: SentinelConfig,
    executables: ExecutableRegistry,
    data: Arc<dyn DataLayer>,
    runtimes: Arc<dyn RuntimeProvider>,
    probe: Arc<dyn DeviceProbe>,
    clock: Arc<dyn Clock>,
}

impl SentinelBuilder {
    pub fn new(config: SentinelConfig, data: Arc<dyn DataLayer>, runtimes: Arc<dyn RuntimeProvider>) -> Self {
        Self {
            config,
            executables: ExecutableRegistry::new(),
            data,
            runtimes,
            probe: Arc::new(SysfsProbe::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Add an executable next to the built-ins.
    pub fn register<E: Executable>(mut self, executable: E) -> Result<Self, RegistryError> {
        self.executables.register(executable)?;
        Ok(self)
    }

    pub fn device_probe(mut self, probe: Arc<dyn DeviceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration without opening devices or starting threads.
    pub fn check(&self) -> Result<Arc<RegistrySnapshot>, SentinelError> {
        let mut executables = self.executables.clone();
        register_builtins(&mut executables)?;
        let registry = self.registry(executables)?;
        Ok(registry.snapshot())
    }

    fn registry(&self, executables: ExecutableRegistry) -> Result<TaskRegistry, SentinelError> {
        self.config.validate()?;
        let registry = TaskRegistry::load(
            &self.config.tasks,
            Arc::new(executables),
            self.config.serviced_classes(),
        )?;
        Ok(registry)
    }

    pub fn build(mut self) -> Result<Sentinel, SentinelError> {
        register_builtins(&mut self.executables)?;
        let executables = std::mem::take(&mut self.executables);
        let registry = Arc::new(self.registry(executables)?);
        let identity = Arc::new(IdentityStore::load(&self.config.identity)?);

        let mut bound = Vec::with_capacity(self.config.engines.len());
        for engine in &self.config.engines {
            let accelerator = AcceleratorBinding::open(
                engine.accelerator,
                &self.config.scheduler.models_dir,
                self.probe.as_ref(),
                self.runtimes.as_ref(),
            )
            .map_err(|source| EngineError::AcceleratorInit {
                engine: engine.name.clone(),
                source,
            })?;
            let ring = self.config.ring_buffers.get(&engine.ring_buffers).ok_or_else(|| {
                ConfigError::UnknownRingModel {
                    engine: engine.name.clone(),
                    model: engine.ring_buffers.clone(),
                }
            })?;
            let pool = RingBufferPool::new(
                [RingBufferModel::from_config(&engine.ring_buffers, ring)],
                self.config.scheduler.buffer_timeout(),
            );
            bound.push((engine, accelerator, pool));
        }

        let board = Arc::new(JobBoard::new(
            self.config
                .engines
                .iter()
                .map(|e| (e.name.clone(), e.priority_classes())),
        ));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(self.clock.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            board,
            Arc::new(JobLedger::with_capacity(self.config.scheduler.ledger_capacity)),
            OutpostTable::from_config(&self.config.outposts),
            ids,
            self.clock.clone(),
        ));
        let services = Arc::new(EngineServices {
            data: self.data.clone(),
            identity: identity.clone(),
            retention: self.config.retention.clone(),
            clock: self.clock.clone(),
        });

        let mut devices = Vec::with_capacity(bound.len());
        let mut engines = Vec::with_capacity(bound.len());
        for (index, (config, accelerator, pool)) in bound.into_iter().enumerate() {
            devices.push(BoundDevice {
                engine: config.name.clone(),
                kind: accelerator.kind(),
                address: accelerator.device().address.clone(),
                ring_buffers: config.ring_buffers.clone(),
            });
            engines.push(TaskEngine::new(
                index,
                config.name.clone(),
                config.ring_buffers.clone(),
                pool,
                accelerator,
                dispatcher.clone(),
                services.clone(),
            ));
        }

        let group = EngineGroup::spawn(engines, dispatcher.clone())?;
        let tasks = dispatcher.registry().snapshot().names().count();
        tracing::info!(engines = ?group.engine_names(), tasks, "sentinel started");
        Ok(Sentinel {
            control: ControlChannel::new(dispatcher.clone(), devices.clone()),
            dispatcher,
            devices,
            identity,
            group,
        })
    }
}

/// A running engine set.
pub struct Sentinel {
    dispatcher: Arc<Dispatcher>,
    control: ControlChannel,
    devices: Vec<BoundDevice>,
    identity: Arc<IdentityStore>,
    group: EngineGroup,
}

impl Sentinel {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    pub fn identity(&self) -> &Arc<IdentityStore> {
        &self.identity
    }

    pub fn submit(&self, task: &str, target: JobTarget) -> Result<JobId, DispatchError> {
        self.dispatcher.submit(task, target)
    }

    pub fn inject(&self, task: &str, target: JobTarget) -> Result<JobId, DispatchError> {
        self.dispatcher.inject(task, target)
    }

    pub fn event_completed(&self, event: &EventRef) -> Vec<(String, Result<JobId, DispatchError>)> {
        self.dispatcher.event_completed(event)
    }

    /// Swap in new task definitions; jobs already accepted keep the old ones.
    pub fn reload(&self, config: &SentinelConfig) -> Result<u64, ConfigError> {
        self.dispatcher.registry().reload(&config.tasks)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::collect(&self.dispatcher)
    }

    pub fn hardware(&self) -> Vec<HardwareStatus> {
        HardwareStatus::collect(&self.devices, &self.dispatcher)
    }

    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.dispatcher.ledger().get(id)
    }

    pub async fn wait_settled(&self, id: JobId) -> Option<JobRecord> {
        self.dispatcher.ledger().wait_settled(id).await
    }

    pub async fn wait_idle(&self) -> JobCounts {
        self.dispatcher.ledger().wait_idle().await
    }

    /// Stop accepting work; running jobs finish. Returns the number of
    /// accepted jobs that were abandoned.
    pub fn drain(&self) -> usize {
        self.group.request_shutdown()
    }

    /// Drain and wait for every engine thread to exit.
    pub async fn shutdown(self) {
        self.group.shutdown_and_join().await;
        tracing::info!("sentinel stopped");
    }
}
