//! Executable - the code behind a task name.
//!
//! Two layers, same as any type-erased registry:
//! - **Typed**: `Executable` with an associated `Params` type read from the
//!   task's parameter file
//! - **Dyn**: `DynExecutable`, object-safe, stored as `Arc<dyn DynExecutable>`
//!
//! `TypedExecutable<E>` bridges the two by loading `E::Params` before every run.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::app::context::TaskContext;
use crate::domain::{TaskError, TrackingResultSet};

/// What a successful run hands back to the engine.
#[derive(Debug, Default)]
pub struct TaskOutput {
    /// Persisted through the data layer by the engine, in order.
    pub result_sets: Vec<TrackingResultSet>,
    pub summary: Option<serde_json::Value>,
}

impl TaskOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_set(set: TrackingResultSet) -> Self {
        Self {
            result_sets: vec![set],
            summary: None,
        }
    }

    pub fn summary(mut self, summary: serde_json::Value) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// # Example
/// ```ignore
/// struct CountFrames;
///
/// #[async_trait]
/// impl Executable for CountFrames {
///     const NAME: &'static str = "CountFrames";
///     type Params = ();
///
///     async fn run(&self, ctx: &mut TaskContext<'_>, _: &()) -> Result<TaskOutput, TaskError> {
///         let frames = ctx.frames_to_load(None).await?;
///         Ok(TaskOutput::empty().summary(serde_json::json!({ "frames": frames.len() })))
///     }
/// }
/// ```
#[async_trait]
pub trait Executable: Send + Sync + 'static {
    /// Concrete task names map to executables by this name.
    const NAME: &'static str;

    /// Result key read when the task definition sets no `trk_type`.
    const DEFAULT_INPUT: &'static str = "trk";

    type Params: DeserializeOwned + Default + Send + Sync + 'static;

    async fn run(&self, ctx: &mut TaskContext<'_>, params: &Self::Params) -> Result<TaskOutput, TaskError>;
}

#[async_trait]
pub trait DynExecutable: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_input(&self) -> &'static str;

    /// Parse the parameter file without running anything.
    fn check_params(&self, path: Option<&Path>) -> Result<(), TaskError>;

    async fn run_dyn(&self, ctx: &mut TaskContext<'_>, params: Option<&Path>) -> Result<TaskOutput, TaskError>;
}

pub struct TypedExecutable<E: Executable> {
    executable: E,
}

impl<E: Executable> TypedExecutable<E> {
    pub fn new(executable: E) -> Self {
        Self { executable }
    }
}

#[async_trait]
impl<E: Executable> DynExecutable for TypedExecutable<E> {
    fn name(&self) -> &'static str {
        E::NAME
    }

    fn default_input(&self) -> &'static str {
        E::DEFAULT_INPUT
    }

    fn check_params(&self, path: Option<&Path>) -> Result<(), TaskError> {
        load_params::<E::Params>(path).map(|_| ())
    }

    async fn run_dyn(&self, ctx: &mut TaskContext<'_>, params: Option<&Path>) -> Result<TaskOutput, TaskError> {
        let params = load_params::<E::Params>(params)?;
        self.executable.run(ctx, &params).await
    }
}

/// Read TOML parameters; no file means defaults.
pub fn load_params<P: DeserializeOwned + Default>(path: Option<&Path>) -> Result<P, TaskError> {
    let Some(path) = path else {
        return Ok(P::default());
    };
    let text = fs::read_to_string(path).map_err(|e| TaskError::Params {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    toml::from_str(&text).map_err(|e| TaskError::Params {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
