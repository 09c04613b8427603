//! Error taxonomy.
//!
//! Configuration and accelerator-initialisation errors are fatal at startup.
//! Everything a job can hit at run time funnels into `TaskError`, which the
//! engine records against the job without taking the engine down (the one
//! exception being `TaskError::Accelerator`, which degrades the engine).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::class::PriorityClass;
use super::results::SchemaError;
use crate::accelerator::AcceleratorKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot load identity baselines {}: {message}", .path.display())]
    Baselines { path: PathBuf, message: String },

    #[error("cannot load inference fixtures {}: {message}", .path.display())]
    Fixtures { path: PathBuf, message: String },

    #[error("task '{alias}' aliases '{target}', which is itself an alias")]
    NestedAlias { alias: String, target: String },

    #[error("task '{alias}' aliases unknown task '{target}'")]
    UnknownAliasTarget { alias: String, target: String },

    #[error("task '{task}' parameters: {message}")]
    TaskParams { task: String, message: String },

    #[error("task '{task}' has no registered executable")]
    UnknownExecutable { task: String },

    #[error("task '{task}' chains to unknown task '{target}'")]
    UnknownChainTarget { task: String, target: String },

    #[error("chain cycle: {}", .0.join(" -> "))]
    ChainCycle(Vec<String>),

    #[error("task '{task}' has invalid class {value}; classes start at 1")]
    InvalidClass { task: String, value: u8 },

    #[error("task '{task}' is {class} but no engine services that class")]
    UnservicedClass { task: String, class: PriorityClass },

    #[error("engine '{engine}' services no classes")]
    EmptyEngineClasses { engine: String },

    #[error("engine '{engine}' lists invalid class {value}")]
    InvalidEngineClass { engine: String, value: u8 },

    #[error("scheduler.ledger_capacity must be at least 1")]
    ZeroLedgerCapacity,

    #[error("engine name '{0}' is declared twice")]
    DuplicateEngine(String),

    #[error("engine '{engine}' uses unknown ring-buffer model '{model}'")]
    UnknownRingModel { engine: String, model: String },

    #[error("ring-buffer model '{model}' has no size classes")]
    EmptyRingModel { model: String },

    #[error("ring-buffer model '{model}' size {width}x{height} has zero depth")]
    ZeroDepth {
        model: String,
        width: u32,
        height: u32,
    },

    #[error("outpost {node}/{view} subscribes to unknown task '{task}'")]
    UnknownSubscribedTask {
        node: String,
        view: String,
        task: String,
    },
}

#[derive(Debug, Clone, Error)]
#[error("ring buffer {model} {size_class:?} exhausted after {waited:?}")]
pub struct BufferExhausted {
    pub model: String,
    pub size_class: (u32, u32),
    pub waited: Duration,
}

#[derive(Debug, Error)]
pub enum AcceleratorInitError {
    #[error("{kind} accelerator not detected: {detail}")]
    DeviceNotFound { kind: AcceleratorKind, detail: String },

    #[error("no model runtime available for {kind}")]
    RuntimeUnavailable { kind: AcceleratorKind },

    #[error("{kind} runtime failed to start: {message}")]
    Runtime { kind: AcceleratorKind, message: String },
}

/// Device-level failure during inference (disconnect, driver fault).
#[derive(Debug, Clone, Error)]
#[error("{kind} device failure: {message}")]
pub struct AcceleratorRuntimeError {
    pub kind: AcceleratorKind,
    pub message: String,
}

#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Device(#[from] AcceleratorRuntimeError),

    #[error("model {model}: {message}")]
    Model { model: String, message: String },
}

#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("data layer: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Execution(String),

    #[error("task '{task}' needs {expected} target")]
    WrongTarget { task: String, expected: &'static str },

    #[error("parameters {}: {message}", .path.display())]
    Params { path: PathBuf, message: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Buffer(#[from] BufferExhausted),

    #[error(transparent)]
    Accelerator(AcceleratorRuntimeError),

    #[error("model {model}: {message}")]
    Model { model: String, message: String },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(
        "retention failsafe tripped: face ratio {ratio:.2} below {threshold:.2} across {events} events"
    )]
    RetentionFailsafeTripped {
        ratio: f64,
        threshold: f64,
        events: usize,
    },

    #[error("identity store has another writer (waited {waited:?})")]
    IdentityStoreBusy { waited: Duration },
}

impl From<InferenceError> for TaskError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Device(e) => TaskError::Accelerator(e),
            InferenceError::Model { model, message } => TaskError::Model { model, message },
        }
    }
}

impl TaskError {
    /// Whether this failure should take the engine out of service.
    pub fn degrades_engine(&self) -> bool {
        matches!(self, TaskError::Accelerator(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("no engine available for task '{task}' ({class})")]
    NoEligibleEngine { task: String, class: PriorityClass },

    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine '{engine}': {source}")]
    AcceleratorInit {
        engine: String,
        #[source]
        source: AcceleratorInitError,
    },

    #[error("engine '{engine}': cannot build runtime: {source}")]
    Runtime {
        engine: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine '{engine}': cannot spawn worker thread: {source}")]
    Spawn {
        engine: String,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error for assembling and starting the engine set.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Registry(#[from] crate::typed::RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_degrade_model_errors_do_not() {
        let device: TaskError = InferenceError::Device(AcceleratorRuntimeError {
            kind: AcceleratorKind::Coral,
            message: "usb reset".into(),
        })
        .into();
        assert!(device.degrades_engine());

        let model: TaskError = InferenceError::Model {
            model: "faces".into(),
            message: "bad tensor".into(),
        }
        .into();
        assert!(!model.degrades_engine());
    }

    #[test]
    fn chain_cycle_message_lists_path() {
        let err = ConfigError::ChainCycle(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(err.to_string(), "chain cycle: A -> B -> A");
    }
}
