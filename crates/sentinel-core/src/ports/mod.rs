//! Ports - traits at the boundary with the host and external collaborators.
//!
//! - `DataLayer`: event frames and result sets (capture side owns storage)
//! - `DeviceProbe` / `RuntimeProvider` / `ModelRuntime`: accelerator hardware
//! - `Clock` / `IdGenerator`: time and job ids, swappable in tests

pub mod clock;
pub mod data_layer;
pub mod device;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::data_layer::{DataLayer, FrameMeta};
pub use self::device::{DeviceInfo, DeviceProbe, ModelRuntime, RuntimeFault, RuntimeProvider};
pub use self::id_generator::{IdGenerator, UlidGenerator};
