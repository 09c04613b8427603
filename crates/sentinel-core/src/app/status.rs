//! Status views for the control channel.

use serde::{Deserialize, Serialize};

use super::board::{EngineSlotView, EngineState};
use super::dispatcher::Dispatcher;
use crate::accelerator::AcceleratorKind;
use crate::config::OutpostConfig;
use crate::domain::JobCounts;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub engines: Vec<EngineSlotView>,
    pub counts: JobCounts,
    /// Accepted jobs not yet on an engine.
    pub pending: usize,
    pub outposts: Vec<OutpostConfig>,
    pub registry_version: u64,
}

impl StatusReport {
    pub fn collect(dispatcher: &Dispatcher) -> Self {
        Self {
            engines: dispatcher.board().engines(),
            counts: dispatcher.ledger().counts(),
            pending: dispatcher.board().pending_len(),
            outposts: dispatcher.outposts(),
            registry_version: dispatcher.registry().snapshot().version(),
        }
    }
}

/// Accelerator bound to an engine at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundDevice {
    pub engine: String,
    pub kind: AcceleratorKind,
    pub address: String,
    pub ring_buffers: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareStatus {
    pub engine: String,
    pub kind: AcceleratorKind,
    pub address: String,
    pub ring_buffers: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl HardwareStatus {
    /// Join the startup bindings with the board's live degradation state.
    pub fn collect(devices: &[BoundDevice], dispatcher: &Dispatcher) -> Vec<Self> {
        let slots = dispatcher.board().engines();
        devices
            .iter()
            .map(|d| {
                let degraded = slots
                    .iter()
                    .find(|s| s.name == d.engine && s.state == EngineState::Degraded)
                    .map(|s| s.degraded_reason.clone().unwrap_or_default());
                Self {
                    engine: d.engine.clone(),
                    kind: d.kind,
                    address: d.address.clone(),
                    ring_buffers: d.ring_buffers.clone(),
                    degraded,
                }
            })
            .collect()
    }
}
