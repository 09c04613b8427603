//! App - the scheduler proper.
//!
//! # Components
//! - **TaskRegistry**: task definitions, aliases and chains, as swappable snapshots
//! - **Dispatcher**: job intake (control, outpost events, manual, chain hops)
//! - **JobBoard**: assignment of jobs to engines by priority class
//! - **JobLedger**: per-job lifecycle records
//! - **TaskEngine / EngineGroup**: one worker thread per accelerator
//! - **ControlChannel**: JSON request/response surface
//! - **SentinelBuilder**: fail-fast assembly of all of the above

pub mod board;
pub mod builder;
pub mod context;
pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod group;
pub mod ledger;
pub mod outposts;
pub mod status;
pub mod task_registry;

pub use self::board::{EngineSlotView, EngineState, JobBoard, Placement};
pub use self::builder::{Sentinel, SentinelBuilder};
pub use self::context::{EngineServices, TaskContext};
pub use self::control::{ControlChannel, ControlRequest, ControlResponse, Dispatched};
pub use self::dispatcher::Dispatcher;
pub use self::engine::TaskEngine;
pub use self::group::EngineGroup;
pub use self::ledger::JobLedger;
pub use self::outposts::OutpostTable;
pub use self::status::{BoundDevice, HardwareStatus, StatusReport};
pub use self::task_registry::{RegistrySnapshot, ResolvedTask, TaskDef, TaskEntry, TaskRegistry};
