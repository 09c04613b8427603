//! FixtureRuntime - scripted model runtime for development and tests.
//!
//! Answers come from a `FixtureScript`: a default inference per model,
//! optionally overridden per frame index. The script is shared, so a test
//! can keep a handle and inspect the calls each engine made.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::accelerator::{Inference, ModelArtifact};
use crate::domain::{AcceleratorInitError, BoundingBox, ConfigError};
use crate::ports::{DeviceInfo, ModelRuntime, RuntimeFault, RuntimeProvider};
use crate::ring::FrameView;

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureCall {
    pub device: String,
    pub model: String,
    pub frame: u32,
    pub roi: Option<BoundingBox>,
}

/// File form of a script: `{ "models": { "<name>": <Inference> } }`.
#[derive(Debug, Default, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    models: HashMap<String, Inference>,
}

#[derive(Debug, Default)]
struct ScriptState {
    models: HashMap<String, Inference>,
    frames: HashMap<(String, u32), Inference>,
    model_faults: HashMap<String, String>,
    /// Device fault raised once this many calls have succeeded.
    device_fault_after: Option<(usize, String)>,
    calls: Vec<FixtureCall>,
}

#[derive(Debug, Default)]
pub struct FixtureScript {
    state: Mutex<ScriptState>,
}

impl FixtureScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn from_json_file(path: &Path) -> Result<Arc<Self>, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ScriptFile = serde_json::from_str(&text).map_err(|e| ConfigError::Fixtures {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let script = Self::new();
        script.state.lock().models = file.models;
        Ok(script)
    }

    pub fn respond(&self, model: &str, inference: Inference) {
        self.state.lock().models.insert(model.to_string(), inference);
    }

    pub fn respond_frame(&self, model: &str, frame: u32, inference: Inference) {
        self.state
            .lock()
            .frames
            .insert((model.to_string(), frame), inference);
    }

    pub fn fail_model(&self, model: &str, message: &str) {
        self.state
            .lock()
            .model_faults
            .insert(model.to_string(), message.to_string());
    }

    pub fn fail_device_after(&self, calls: usize, message: &str) {
        self.state.lock().device_fault_after = Some((calls, message.to_string()));
    }

    pub fn calls(&self) -> Vec<FixtureCall> {
        self.state.lock().calls.clone()
    }

    fn answer(
        &self,
        device: &str,
        model: &str,
        frame: u32,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, RuntimeFault> {
        let mut state = self.state.lock();
        if let Some((after, message)) = &state.device_fault_after
            && state.calls.len() >= *after
        {
            return Err(RuntimeFault::Device(message.clone()));
        }
        state.calls.push(FixtureCall {
            device: device.to_string(),
            model: model.to_string(),
            frame,
            roi,
        });
        if let Some(message) = state.model_faults.get(model) {
            return Err(RuntimeFault::Model(message.clone()));
        }
        Ok(state
            .frames
            .get(&(model.to_string(), frame))
            .or_else(|| state.models.get(model))
            .cloned()
            .unwrap_or_default())
    }
}

pub struct FixtureRuntime {
    device: String,
    script: Arc<FixtureScript>,
}

impl ModelRuntime for FixtureRuntime {
    fn run(
        &mut self,
        model: &ModelArtifact,
        frame: &FrameView<'_>,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, RuntimeFault> {
        self.script.answer(&self.device, &model.name, frame.meta.index, roi)
    }
}

/// Opens a `FixtureRuntime` on any device, all sharing one script.
#[derive(Clone)]
pub struct FixtureProvider {
    script: Arc<FixtureScript>,
}

impl FixtureProvider {
    pub fn new(script: Arc<FixtureScript>) -> Self {
        Self { script }
    }

    pub fn script(&self) -> &Arc<FixtureScript> {
        &self.script
    }
}

impl RuntimeProvider for FixtureProvider {
    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn ModelRuntime>, AcceleratorInitError> {
        Ok(Box::new(FixtureRuntime {
            device: device.address.clone(),
            script: self.script.clone(),
        }))
    }
}
