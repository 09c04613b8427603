//! Device discovery and model runtimes.
//!
//! Detecting an accelerator and executing a model on it are both host
//! concerns: `DeviceProbe` answers "is the hardware there", `RuntimeProvider`
//! hands back something that can run opaque model artifacts on it.

use serde::{Deserialize, Serialize};

use crate::accelerator::{AcceleratorKind, Inference, ModelArtifact};
use crate::domain::{AcceleratorInitError, BoundingBox};
use crate::ring::FrameView;

/// A detected accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub kind: AcceleratorKind,
    /// Device node or bus address, e.g. `/dev/apex_0` or `usb:2-1`.
    pub address: String,
}

pub trait DeviceProbe: Send + Sync {
    /// Locate a device of `kind`. The error string explains what was searched.
    fn detect(&self, kind: AcceleratorKind) -> Result<DeviceInfo, String>;
}

/// Failure reported by a runtime for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeFault {
    /// The device stopped responding; nothing further will succeed.
    Device(String),
    /// This model or input is bad; the device is fine.
    Model(String),
}

/// Executes model artifacts on one device. Owned by exactly one engine.
pub trait ModelRuntime: Send + Sync {
    fn run(
        &mut self,
        model: &ModelArtifact,
        frame: &FrameView<'_>,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, RuntimeFault>;
}

pub trait RuntimeProvider: Send + Sync {
    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn ModelRuntime>, AcceleratorInitError>;
}
