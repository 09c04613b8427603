//! Typed executables.
//!
//! Each executable declares its parameter type statically; the registry
//! erases it so task definitions can look executables up by name.

pub mod executable;
pub mod registry;

pub use self::executable::{DynExecutable, Executable, TaskOutput, TypedExecutable, load_params};
pub use self::registry::{ExecutableRegistry, RegistryError};
