//! One backend per accelerator kind.

use std::path::{Path, PathBuf};

use super::{Accelerator, AcceleratorKind, Inference, ModelArtifact};
use crate::domain::{AcceleratorInitError, AcceleratorRuntimeError, BoundingBox, InferenceError};
use crate::ports::{DeviceInfo, DeviceProbe, ModelRuntime, RuntimeFault, RuntimeProvider};
use crate::ring::FrameView;

fn run(
    kind: AcceleratorKind,
    runtime: &mut dyn ModelRuntime,
    artifact: &ModelArtifact,
    frame: &FrameView<'_>,
    roi: Option<BoundingBox>,
) -> Result<Inference, InferenceError> {
    runtime.run(artifact, frame, roi).map_err(|fault| match fault {
        RuntimeFault::Device(message) => {
            InferenceError::Device(AcceleratorRuntimeError { kind, message })
        }
        RuntimeFault::Model(message) => InferenceError::Model {
            model: artifact.name.clone(),
            message,
        },
    })
}

fn detect(
    kind: AcceleratorKind,
    probe: &dyn DeviceProbe,
) -> Result<DeviceInfo, AcceleratorInitError> {
    probe
        .detect(kind)
        .map_err(|detail| AcceleratorInitError::DeviceNotFound { kind, detail })
}

/// TensorFlow Lite on the host CPU. Artifacts: `<name>.tflite`.
pub struct CpuBackend {
    device: DeviceInfo,
    models_dir: PathBuf,
    runtime: Box<dyn ModelRuntime>,
}

impl CpuBackend {
    pub fn open(models_dir: &Path, runtimes: &dyn RuntimeProvider) -> Result<Self, AcceleratorInitError> {
        let device = DeviceInfo {
            kind: AcceleratorKind::Cpu,
            address: "cpu".to_string(),
        };
        let runtime = runtimes.open(&device)?;
        Ok(Self {
            device,
            models_dir: models_dir.to_path_buf(),
            runtime,
        })
    }
}

impl Accelerator for CpuBackend {
    fn kind(&self) -> AcceleratorKind {
        AcceleratorKind::Cpu
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn artifact(&self, model: &str) -> ModelArtifact {
        ModelArtifact {
            name: model.to_string(),
            path: self.models_dir.join(format!("{model}.tflite")),
        }
    }

    fn infer(
        &mut self,
        model: &str,
        frame: &FrameView<'_>,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, InferenceError> {
        let artifact = self.artifact(model);
        run(self.kind(), self.runtime.as_mut(), &artifact, frame, roi)
    }
}

/// Coral Edge TPU. Artifacts are compiled for the TPU: `<name>_edgetpu.tflite`.
pub struct EdgeTpuBackend {
    device: DeviceInfo,
    models_dir: PathBuf,
    runtime: Box<dyn ModelRuntime>,
}

impl EdgeTpuBackend {
    pub fn open(
        models_dir: &Path,
        probe: &dyn DeviceProbe,
        runtimes: &dyn RuntimeProvider,
    ) -> Result<Self, AcceleratorInitError> {
        let device = detect(AcceleratorKind::Coral, probe)?;
        let runtime = runtimes.open(&device)?;
        Ok(Self {
            device,
            models_dir: models_dir.to_path_buf(),
            runtime,
        })
    }
}

impl Accelerator for EdgeTpuBackend {
    fn kind(&self) -> AcceleratorKind {
        AcceleratorKind::Coral
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn artifact(&self, model: &str) -> ModelArtifact {
        ModelArtifact {
            name: model.to_string(),
            path: self.models_dir.join(format!("{model}_edgetpu.tflite")),
        }
    }

    fn infer(
        &mut self,
        model: &str,
        frame: &FrameView<'_>,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, InferenceError> {
        let artifact = self.artifact(model);
        run(self.kind(), self.runtime.as_mut(), &artifact, frame, roi)
    }
}

/// Intel NCS2 through OpenVINO IR. Artifacts: `<name>.xml` (weights beside it).
///
/// Kept for existing deployments; the toolkit has dropped the device.
pub struct LegacyVpuBackend {
    device: DeviceInfo,
    models_dir: PathBuf,
    runtime: Box<dyn ModelRuntime>,
}

impl LegacyVpuBackend {
    pub fn open(
        models_dir: &Path,
        probe: &dyn DeviceProbe,
        runtimes: &dyn RuntimeProvider,
    ) -> Result<Self, AcceleratorInitError> {
        tracing::warn!(
            accelerator = "ncs2",
            "NCS2 support is deprecated; migrate this engine to coral or cpu"
        );
        let device = detect(AcceleratorKind::Ncs2, probe)?;
        let runtime = runtimes.open(&device)?;
        Ok(Self {
            device,
            models_dir: models_dir.to_path_buf(),
            runtime,
        })
    }
}

impl Accelerator for LegacyVpuBackend {
    fn kind(&self) -> AcceleratorKind {
        AcceleratorKind::Ncs2
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn artifact(&self, model: &str) -> ModelArtifact {
        ModelArtifact {
            name: model.to_string(),
            path: self.models_dir.join(format!("{model}.xml")),
        }
    }

    fn infer(
        &mut self,
        model: &str,
        frame: &FrameView<'_>,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, InferenceError> {
        let artifact = self.artifact(model);
        run(self.kind(), self.runtime.as_mut(), &artifact, frame, roi)
    }
}
