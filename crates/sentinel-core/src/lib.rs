//! sentinel-core
//!
//! Priority-class task engine for camera event analysis: object and face
//! detection, face recognition, vehicle speed and retention sweeps, run on
//! per-engine accelerators with bounded frame memory.
//!
//! # Modules
//! - **domain**: ids, priority classes, events, jobs, result sets, errors
//! - **config**: TOML configuration
//! - **ports**: traits at the host boundary (data layer, devices, clock, ids)
//! - **ring**: size-classed ring-buffer pools
//! - **accelerator**: accelerator backends and the per-engine binding
//! - **typed**: `Executable` trait and the type-erased executable registry
//! - **app**: registry, dispatcher, engines, control channel, builder
//! - **tasks**: built-in executables, recognition ensemble, identity store
//! - **impls**: in-memory and development implementations of the ports
//! - **observability**: logging setup

pub mod accelerator;
pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod ring;
pub mod tasks;
pub mod typed;

#[cfg(test)]
mod testing;

pub use self::app::{Sentinel, SentinelBuilder};
pub use self::config::SentinelConfig;
pub use self::domain::SentinelError;
