//! ExecutableRegistry - executables by name.

use std::collections::HashMap;
use std::sync::Arc;

use super::executable::{DynExecutable, Executable, TypedExecutable};

/// # Example
/// ```ignore
/// let mut registry = ExecutableRegistry::new();
/// registry.register(GetObjects)?;
/// let exec = registry.get("GetObjects");
/// ```
#[derive(Clone, Default)]
pub struct ExecutableRegistry {
    executables: HashMap<&'static str, Arc<dyn DynExecutable>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("executable '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl ExecutableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Executable>(&mut self, executable: E) -> Result<(), RegistryError> {
        if self.executables.contains_key(E::NAME) {
            return Err(RegistryError::AlreadyRegistered(E::NAME.to_string()));
        }
        self.executables
            .insert(E::NAME, Arc::new(TypedExecutable::new(executable)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynExecutable>> {
        self.executables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executables.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.executables.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
