//! Accelerator binding.
//!
//! An engine owns exactly one accelerator for its lifetime. The backend is
//! picked from the configured kind when the engine starts and never changes;
//! a missing device is a startup error, there is no silent CPU fallback.
//!
//! # Degradation
//! A device-level fault (USB disconnect, driver crash) poisons the binding:
//! every later `infer` returns the same `AcceleratorRuntimeError` without
//! touching the runtime, and the engine stops leasing jobs. Model-level
//! faults only fail the job that hit them.

mod backends;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use self::backends::{CpuBackend, EdgeTpuBackend, LegacyVpuBackend};
use crate::domain::{AcceleratorInitError, AcceleratorRuntimeError, BoundingBox, InferenceError};
use crate::ports::{DeviceInfo, DeviceProbe, RuntimeProvider};
use crate::ring::FrameView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceleratorKind {
    Cpu,
    /// Google Coral Edge TPU (PCIe or USB).
    Coral,
    /// Intel Neural Compute Stick 2.
    Ncs2,
}

impl AcceleratorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AcceleratorKind::Cpu => "cpu",
            AcceleratorKind::Coral => "coral",
            AcceleratorKind::Ncs2 => "ncs2",
        }
    }
}

impl fmt::Display for AcceleratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcceleratorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(AcceleratorKind::Cpu),
            "coral" => Ok(AcceleratorKind::Coral),
            "ncs2" => Ok(AcceleratorKind::Ncs2),
            other => Err(format!("unknown accelerator kind '{other}'")),
        }
    }
}

/// A model file resolved for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    /// Logical name tasks ask for, e.g. `faces`.
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Output of one model invocation. Detectors fill `detections`; embedding
/// models fill `embedding`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Capability shared by every backend.
pub trait Accelerator: Send + Sync {
    fn kind(&self) -> AcceleratorKind;

    fn device(&self) -> &DeviceInfo;

    /// Where this backend expects the artifact for `model`.
    fn artifact(&self, model: &str) -> ModelArtifact;

    /// Run `model` over `frame`, restricted to `roi` when given.
    fn infer(
        &mut self,
        model: &str,
        frame: &FrameView<'_>,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, InferenceError>;
}

pub struct AcceleratorBinding {
    backend: Box<dyn Accelerator>,
    degraded: Option<AcceleratorRuntimeError>,
}

impl AcceleratorBinding {
    /// Detect the device and start a runtime on it.
    pub fn open(
        kind: AcceleratorKind,
        models_dir: &Path,
        probe: &dyn DeviceProbe,
        runtimes: &dyn RuntimeProvider,
    ) -> Result<Self, AcceleratorInitError> {
        let backend: Box<dyn Accelerator> = match kind {
            AcceleratorKind::Cpu => Box::new(CpuBackend::open(models_dir, runtimes)?),
            AcceleratorKind::Coral => Box::new(EdgeTpuBackend::open(models_dir, probe, runtimes)?),
            AcceleratorKind::Ncs2 => Box::new(LegacyVpuBackend::open(models_dir, probe, runtimes)?),
        };
        tracing::info!(
            accelerator = %kind,
            device = %backend.device().address,
            "accelerator bound"
        );
        Ok(Self::from_backend(backend))
    }

    pub fn from_backend(backend: Box<dyn Accelerator>) -> Self {
        Self {
            backend,
            degraded: None,
        }
    }

    pub fn kind(&self) -> AcceleratorKind {
        self.backend.kind()
    }

    pub fn device(&self) -> &DeviceInfo {
        self.backend.device()
    }

    pub fn degraded(&self) -> Option<&AcceleratorRuntimeError> {
        self.degraded.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn infer(
        &mut self,
        model: &str,
        frame: &FrameView<'_>,
        roi: Option<BoundingBox>,
    ) -> Result<Inference, InferenceError> {
        if let Some(err) = &self.degraded {
            return Err(InferenceError::Device(err.clone()));
        }
        let result = self.backend.infer(model, frame, roi);
        if let Err(InferenceError::Device(err)) = &result {
            tracing::error!(
                accelerator = %err.kind,
                device = %self.backend.device().address,
                error = %err.message,
                "accelerator degraded"
            );
            self.degraded = Some(err.clone());
        }
        result
    }
}

impl fmt::Debug for AcceleratorBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceleratorBinding")
            .field("kind", &self.kind())
            .field("device", self.device())
            .field("degraded", &self.degraded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FrameMeta, ModelRuntime, RuntimeFault};
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe(Option<&'static str>);

    impl DeviceProbe for Probe {
        fn detect(&self, kind: AcceleratorKind) -> Result<DeviceInfo, String> {
            self.0
                .map(|address| DeviceInfo {
                    kind,
                    address: address.to_string(),
                })
                .ok_or_else(|| "nothing on the bus".to_string())
        }
    }

    /// Fails the first call with `fault`, then counts further calls.
    struct FaultyRuntime {
        fault: Option<RuntimeFault>,
        calls: Arc<AtomicUsize>,
    }

    impl ModelRuntime for FaultyRuntime {
        fn run(
            &mut self,
            _model: &ModelArtifact,
            _frame: &FrameView<'_>,
            _roi: Option<BoundingBox>,
        ) -> Result<Inference, RuntimeFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fault.take() {
                Some(fault) => Err(fault),
                None => Ok(Inference::default()),
            }
        }
    }

    struct Provider {
        fault: Option<RuntimeFault>,
        calls: Arc<AtomicUsize>,
    }

    impl RuntimeProvider for Provider {
        fn open(&self, _device: &DeviceInfo) -> Result<Box<dyn ModelRuntime>, AcceleratorInitError> {
            Ok(Box::new(FaultyRuntime {
                fault: self.fault.clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    fn provider(fault: Option<RuntimeFault>) -> (Provider, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Provider {
                fault,
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn frame() -> FrameView<'static> {
        FrameView {
            meta: FrameMeta {
                index: 0,
                width: 1,
                height: 1,
                offset_ms: 0,
            },
            pixels: &[0, 0, 0],
        }
    }

    #[rstest]
    #[case::cpu(AcceleratorKind::Cpu, "/models/objects.tflite")]
    #[case::coral(AcceleratorKind::Coral, "/models/objects_edgetpu.tflite")]
    #[case::ncs2(AcceleratorKind::Ncs2, "/models/objects.xml")]
    fn backends_resolve_their_own_artifacts(#[case] kind: AcceleratorKind, #[case] path: &str) {
        let (runtimes, _) = provider(None);
        let binding =
            AcceleratorBinding::open(kind, Path::new("/models"), &Probe(Some("usb:1-1")), &runtimes)
                .unwrap();
        assert_eq!(binding.kind(), kind);
        assert_eq!(binding.backend.artifact("objects").path, PathBuf::from(path));
    }

    #[test]
    fn missing_device_is_init_error() {
        let (runtimes, _) = provider(None);
        let err = AcceleratorBinding::open(AcceleratorKind::Coral, Path::new("/m"), &Probe(None), &runtimes)
            .unwrap_err();
        assert!(matches!(
            err,
            AcceleratorInitError::DeviceNotFound {
                kind: AcceleratorKind::Coral,
                ..
            }
        ));
    }

    #[test]
    fn cpu_needs_no_device() {
        let (runtimes, _) = provider(None);
        let binding =
            AcceleratorBinding::open(AcceleratorKind::Cpu, Path::new("/m"), &Probe(None), &runtimes).unwrap();
        assert_eq!(binding.device().address, "cpu");
    }

    #[test]
    fn device_fault_degrades_binding() {
        let (runtimes, calls) = provider(Some(RuntimeFault::Device("usb reset".into())));
        let mut binding =
            AcceleratorBinding::open(AcceleratorKind::Coral, Path::new("/m"), &Probe(Some("pci")), &runtimes)
                .unwrap();

        assert!(matches!(
            binding.infer("objects", &frame(), None),
            Err(InferenceError::Device(_))
        ));
        assert!(binding.is_degraded());
        // Later calls fail without reaching the runtime.
        assert!(matches!(
            binding.infer("objects", &frame(), None),
            Err(InferenceError::Device(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn model_fault_leaves_binding_healthy() {
        let (runtimes, _) = provider(Some(RuntimeFault::Model("bad tensor".into())));
        let mut binding =
            AcceleratorBinding::open(AcceleratorKind::Cpu, Path::new("/m"), &Probe(None), &runtimes).unwrap();

        assert!(matches!(
            binding.infer("objects", &frame(), None),
            Err(InferenceError::Model { .. })
        ));
        assert!(!binding.is_degraded());
        assert!(binding.infer("objects", &frame(), None).is_ok());
    }

    #[test]
    fn kind_parses_from_config_names() {
        assert_eq!("ncs2".parse::<AcceleratorKind>().unwrap(), AcceleratorKind::Ncs2);
        assert!("tpu".parse::<AcceleratorKind>().is_err());
    }
}
