//! Impls - port implementations for development and tests.
//!
//! - **InMemoryDataLayer**: event store held in memory
//! - **SysfsProbe**: accelerator detection on a Linux host
//! - **FixtureProvider / FixtureRuntime**: scripted model runtime
//!
//! Production data layers and model runtimes live with the host that owns
//! the capture pipeline and the vendor SDKs.

pub mod fixture_runtime;
pub mod inmem_data;
pub mod sysfs_probe;

pub use self::fixture_runtime::{FixtureCall, FixtureProvider, FixtureRuntime, FixtureScript};
pub use self::inmem_data::InMemoryDataLayer;
pub use self::sysfs_probe::SysfsProbe;
