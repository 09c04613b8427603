//! Shared fixtures for unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::accelerator::{AcceleratorBinding, AcceleratorKind};
use crate::app::context::{EngineServices, TaskContext};
use crate::app::task_registry::TaskRegistry;
use crate::config::{RetentionConfig, TaskConfig};
use crate::domain::{EventRef, Job, JobSource, JobTarget, PriorityClass, TaskError};
use crate::impls::{FixtureProvider, FixtureScript, InMemoryDataLayer, SysfsProbe};
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
use crate::ring::{RingBufferModel, RingBufferPool, RingCtrl, SizeClass};
use crate::tasks::GetObjects;
use crate::tasks::identity::{Baselines, IdentityStore};
use crate::typed::{Executable, ExecutableRegistry, TaskOutput};

pub struct Noop;

#[async_trait]
impl Executable for Noop {
    const NAME: &'static str = "Noop";
    type Params = ();

    async fn run(&self, _ctx: &mut TaskContext<'_>, _params: &()) -> Result<TaskOutput, TaskError> {
        Ok(TaskOutput::empty())
    }
}

/// Registered under `Noop` so a harness task resolves `E`'s default input.
struct InputOf<E>(PhantomData<E>);

#[async_trait]
impl<E: Executable> Executable for InputOf<E> {
    const NAME: &'static str = "Noop";
    const DEFAULT_INPUT: &'static str = E::DEFAULT_INPUT;
    type Params = ();

    async fn run(&self, _ctx: &mut TaskContext<'_>, _params: &()) -> Result<TaskOutput, TaskError> {
        Ok(TaskOutput::empty())
    }
}

pub fn task_config(class: u8) -> TaskConfig {
    TaskConfig {
        alias: None,
        config: None,
        chain: None,
        class,
        trk_type: None,
        ringctrl: RingCtrl::Full,
    }
}

/// A concrete `Noop` task plus one alias of it per `(name, class)`.
/// `GetObjects` is registered too, for definitions that reload it.
pub fn registry(tasks: &[(&str, u8)]) -> TaskRegistry {
    let mut executables = ExecutableRegistry::new();
    executables.register(Noop).unwrap();
    executables.register(GetObjects).unwrap();

    let mut configs = BTreeMap::new();
    configs.insert("Noop".to_string(), task_config(1));
    for &(name, class) in tasks {
        configs.insert(
            name.to_string(),
            TaskConfig {
                alias: Some("Noop".into()),
                ..task_config(class)
            },
        );
    }
    let serviced: BTreeSet<PriorityClass> = (1..=3).filter_map(PriorityClass::new).collect();
    TaskRegistry::load(&configs, Arc::new(executables), serviced).unwrap()
}

pub fn event(node: &str, view: &str, hour: u32) -> EventRef {
    let start = NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap();
    EventRef::new(node, view, start)
}

pub fn job(registry: &TaskRegistry, task: &str) -> Job {
    let snapshot = registry.snapshot();
    Job {
        id: UlidGenerator::new(SystemClock).generate_job_id(),
        task: snapshot.resolve(task).unwrap(),
        target: JobTarget::Event(event("gate", "front", 10)),
        submitted_at: Utc::now(),
        source: JobSource::Manual,
        parent: None,
        snapshot,
    }
}

/// Runs one executable against in-memory data on a fixture-backed CPU engine.
pub struct TaskHarness {
    pub data: Arc<InMemoryDataLayer>,
    pub script: Arc<FixtureScript>,
    pub services: EngineServices,
    pool: RingBufferPool,
    accelerator: AcceleratorBinding,
}

impl TaskHarness {
    pub fn new() -> Self {
        let data = Arc::new(InMemoryDataLayer::new());
        let script = FixtureScript::new();
        let accelerator = AcceleratorBinding::open(
            AcceleratorKind::Cpu,
            Path::new("/models"),
            &SysfsProbe::default(),
            &FixtureProvider::new(script.clone()),
        )
        .unwrap();
        let model = RingBufferModel::new(
            "test",
            vec![SizeClass {
                width: 64,
                height: 48,
                depth: 2,
            }],
        );
        Self {
            services: EngineServices {
                data: data.clone(),
                identity: Arc::new(IdentityStore::new(
                    Baselines::new(),
                    None,
                    Duration::from_millis(50),
                )),
                retention: RetentionConfig::default(),
                clock: Arc::new(SystemClock),
            },
            data,
            script,
            pool: RingBufferPool::new([model], Duration::from_millis(50)),
            accelerator,
        }
    }

    pub fn in_use(&self) -> usize {
        self.pool.in_use("test", (64, 48))
    }

    /// Run `executable` as a task defined by `task`, against `target`.
    pub async fn run<E: Executable>(
        &mut self,
        executable: &E,
        params: &E::Params,
        task: TaskConfig,
        target: JobTarget,
    ) -> Result<TaskOutput, TaskError> {
        let mut executables = ExecutableRegistry::new();
        executables.register(InputOf::<E>(PhantomData)).unwrap();
        let mut configs = BTreeMap::new();
        configs.insert("Noop".to_string(), task);
        let serviced: BTreeSet<PriorityClass> = (1..=3).filter_map(PriorityClass::new).collect();
        let registry = TaskRegistry::load(&configs, Arc::new(executables), serviced).unwrap();

        let job = Job {
            target,
            ..job(&registry, "Noop")
        };
        let mut ctx = TaskContext::new(
            &job,
            "test-engine",
            "test",
            &self.pool,
            &mut self.accelerator,
            &self.services,
        );
        executable.run(&mut ctx, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoInput;

    #[async_trait]
    impl Executable for EchoInput {
        const NAME: &'static str = "EchoInput";
        const DEFAULT_INPUT: &'static str = "fd9";
        type Params = ();

        async fn run(&self, ctx: &mut TaskContext<'_>, _params: &()) -> Result<TaskOutput, TaskError> {
            Ok(TaskOutput::empty().summary(serde_json::json!(ctx.input_key().as_str())))
        }
    }

    #[tokio::test]
    async fn harness_uses_executable_default_input() {
        let mut h = TaskHarness::new();
        let target = JobTarget::Event(event("gate", "front", 10));
        let out = h.run(&EchoInput, &(), task_config(1), target).await.unwrap();
        assert_eq!(out.summary, Some(serde_json::json!("fd9")));
    }

    #[tokio::test]
    async fn harness_honours_trk_type_override() {
        let mut h = TaskHarness::new();
        let task = TaskConfig {
            trk_type: Some("obj".into()),
            ..task_config(1)
        };
        let target = JobTarget::Event(event("gate", "front", 10));
        let out = h.run(&EchoInput, &(), task, target).await.unwrap();
        assert_eq!(out.summary, Some(serde_json::json!("obj")));
    }
}
