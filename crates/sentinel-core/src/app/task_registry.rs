//! TaskRegistry - task names, aliases and chains.
//!
//! Task definitions are compiled into an immutable [`RegistrySnapshot`]. The
//! registry holds the current snapshot behind a short lock and swaps it whole
//! on reload; jobs keep an `Arc` of the snapshot they were resolved against,
//! so a chain that started before a reload finishes under the old
//! definitions.
//!
//! # Validation
//! A snapshot is only built if every definition checks out:
//! - an alias points at an existing, concrete task
//! - a concrete task has an executable of the same name
//! - chains point at existing tasks and never loop
//! - classes are >= 1 and serviced by some engine
//! - a task's parameter file parses as its executable's parameters

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::TaskConfig;
use crate::domain::{ConfigError, PriorityClass, ResultKey};
use crate::ring::RingCtrl;
use crate::typed::{DynExecutable, ExecutableRegistry};

/// Per-name settings shared by both entry kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDef {
    pub class: PriorityClass,
    pub chain: Option<String>,
    pub trk_type: Option<ResultKey>,
    pub ringctrl: RingCtrl,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEntry {
    Concrete { executable: String, def: TaskDef },
    Alias { target: String, def: TaskDef },
}

impl TaskEntry {
    pub fn def(&self) -> &TaskDef {
        match self {
            TaskEntry::Concrete { def, .. } | TaskEntry::Alias { def, .. } => def,
        }
    }
}

/// Everything an engine needs to run a task, fixed at resolution time.
pub struct ResolvedTask {
    pub name: String,
    pub executable: Arc<dyn DynExecutable>,
    /// Set when this task borrows another task's executable.
    pub alias_of: Option<String>,
    pub class: PriorityClass,
    pub chain_target: Option<String>,
    pub input_key: ResultKey,
    pub ringctrl: RingCtrl,
    pub config: Option<PathBuf>,
}

impl ResolvedTask {
    pub fn executable_name(&self) -> &'static str {
        self.executable.name()
    }
}

impl fmt::Debug for ResolvedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTask")
            .field("name", &self.name)
            .field("executable", &self.executable.name())
            .field("alias_of", &self.alias_of)
            .field("class", &self.class)
            .field("chain_target", &self.chain_target)
            .field("input_key", &self.input_key)
            .field("ringctrl", &self.ringctrl)
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Debug)]
pub struct RegistrySnapshot {
    version: u64,
    entries: BTreeMap<String, TaskEntry>,
    resolved: BTreeMap<String, Arc<ResolvedTask>>,
}

impl RegistrySnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<ResolvedTask>> {
        self.resolved.get(name).cloned()
    }

    pub fn entry(&self, name: &str) -> Option<&TaskEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn build(
        version: u64,
        tasks: &BTreeMap<String, TaskConfig>,
        executables: &ExecutableRegistry,
        serviced: &BTreeSet<PriorityClass>,
    ) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();
        for (name, task) in tasks {
            let class = PriorityClass::new(task.class).ok_or_else(|| ConfigError::InvalidClass {
                task: name.clone(),
                value: task.class,
            })?;
            if !serviced.contains(&class) {
                return Err(ConfigError::UnservicedClass {
                    task: name.clone(),
                    class,
                });
            }
            let def = TaskDef {
                class,
                chain: task.chain.clone(),
                trk_type: task.trk_type.as_deref().map(ResultKey::from),
                ringctrl: task.ringctrl,
                config: task.config.clone(),
            };
            let entry = match &task.alias {
                Some(target) => TaskEntry::Alias {
                    target: target.clone(),
                    def,
                },
                None => TaskEntry::Concrete {
                    executable: name.clone(),
                    def,
                },
            };
            entries.insert(name.clone(), entry);
        }

        let mut resolved = BTreeMap::new();
        for (name, entry) in &entries {
            let executable_name = match entry {
                TaskEntry::Concrete { executable, .. } => executable,
                TaskEntry::Alias { target, .. } => match entries.get(target) {
                    None => {
                        return Err(ConfigError::UnknownAliasTarget {
                            alias: name.clone(),
                            target: target.clone(),
                        });
                    }
                    Some(TaskEntry::Alias { .. }) => {
                        return Err(ConfigError::NestedAlias {
                            alias: name.clone(),
                            target: target.clone(),
                        });
                    }
                    Some(TaskEntry::Concrete { executable, .. }) => executable,
                },
            };
            let executable = executables
                .get(executable_name)
                .ok_or_else(|| ConfigError::UnknownExecutable { task: name.clone() })?;

            let def = entry.def();
            if let Some(target) = &def.chain
                && !entries.contains_key(target)
            {
                return Err(ConfigError::UnknownChainTarget {
                    task: name.clone(),
                    target: target.clone(),
                });
            }

            executable
                .check_params(def.config.as_deref())
                .map_err(|e| ConfigError::TaskParams {
                    task: name.clone(),
                    message: e.to_string(),
                })?;

            let input_key = def
                .trk_type
                .clone()
                .unwrap_or_else(|| ResultKey::from(executable.default_input()));
            let alias_of = match entry {
                TaskEntry::Alias { target, .. } => Some(target.clone()),
                TaskEntry::Concrete { .. } => None,
            };
            resolved.insert(
                name.clone(),
                Arc::new(ResolvedTask {
                    name: name.clone(),
                    executable,
                    alias_of,
                    class: def.class,
                    chain_target: def.chain.clone(),
                    input_key,
                    ringctrl: def.ringctrl,
                    config: def.config.clone(),
                }),
            );
        }

        check_chain_cycles(&entries)?;

        Ok(Self {
            version,
            entries,
            resolved,
        })
    }
}

/// Each task has at most one successor, so following it from every start
/// either ends or revisits a task on the current path.
fn check_chain_cycles(entries: &BTreeMap<String, TaskEntry>) -> Result<(), ConfigError> {
    let mut cleared: BTreeSet<&str> = BTreeSet::new();
    for start in entries.keys() {
        let mut path: Vec<&str> = Vec::new();
        let mut current = Some(start.as_str());
        while let Some(name) = current {
            if cleared.contains(name) {
                break;
            }
            if let Some(pos) = path.iter().position(|&p| p == name) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(name.to_string());
                return Err(ConfigError::ChainCycle(cycle));
            }
            path.push(name);
            current = entries.get(name).and_then(|e| e.def().chain.as_deref());
        }
        cleared.extend(path);
    }
    Ok(())
}

pub struct TaskRegistry {
    executables: Arc<ExecutableRegistry>,
    serviced: BTreeSet<PriorityClass>,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl TaskRegistry {
    pub fn load(
        tasks: &BTreeMap<String, TaskConfig>,
        executables: Arc<ExecutableRegistry>,
        serviced: BTreeSet<PriorityClass>,
    ) -> Result<Self, ConfigError> {
        let snapshot = RegistrySnapshot::build(1, tasks, &executables, &serviced)?;
        Ok(Self {
            executables,
            serviced,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    /// Resolve against the current snapshot.
    pub fn resolve(&self, name: &str) -> Option<Arc<ResolvedTask>> {
        self.snapshot().resolve(name)
    }

    pub fn executables(&self) -> &ExecutableRegistry {
        &self.executables
    }

    /// Validate `tasks` and make them current. On error the old snapshot stays.
    pub fn reload(&self, tasks: &BTreeMap<String, TaskConfig>) -> Result<u64, ConfigError> {
        let version = self.snapshot().version() + 1;
        let snapshot = RegistrySnapshot::build(version, tasks, &self.executables, &self.serviced)?;
        *self.current.write() = Arc::new(snapshot);
        tracing::info!(version, tasks = tasks.len(), "task registry reloaded");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::TaskContext;
    use crate::domain::TaskError;
    use crate::typed::{Executable, TaskOutput};
    use async_trait::async_trait;
    use rstest::rstest;

    struct Faces;

    #[async_trait]
    impl Executable for Faces {
        const NAME: &'static str = "GetFaces";
        type Params = ();

        async fn run(&self, _ctx: &mut TaskContext<'_>, _params: &()) -> Result<TaskOutput, TaskError> {
            Ok(TaskOutput::empty())
        }
    }

    struct Recon;

    #[async_trait]
    impl Executable for Recon {
        const NAME: &'static str = "FaceRecon";
        const DEFAULT_INPUT: &'static str = "fd1";
        type Params = ();

        async fn run(&self, _ctx: &mut TaskContext<'_>, _params: &()) -> Result<TaskOutput, TaskError> {
            Ok(TaskOutput::empty())
        }
    }

    fn executables() -> Arc<ExecutableRegistry> {
        let mut registry = ExecutableRegistry::new();
        registry.register(Faces).unwrap();
        registry.register(Recon).unwrap();
        Arc::new(registry)
    }

    fn serviced() -> BTreeSet<PriorityClass> {
        [PriorityClass::REALTIME, PriorityClass::ANALYSIS].into_iter().collect()
    }

    fn task(class: u8) -> TaskConfig {
        TaskConfig {
            alias: None,
            config: None,
            chain: None,
            class,
            trk_type: None,
            ringctrl: RingCtrl::Full,
        }
    }

    fn standard_tasks() -> BTreeMap<String, TaskConfig> {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            "GetFaces".to_string(),
            TaskConfig {
                chain: Some("FaceRecon".into()),
                ringctrl: RingCtrl::Trk,
                ..task(1)
            },
        );
        tasks.insert(
            "GetFaces2".to_string(),
            TaskConfig {
                alias: Some("GetFaces".into()),
                chain: Some("FaceRecon".into()),
                trk_type: Some("obj".into()),
                ..task(2)
            },
        );
        tasks.insert("FaceRecon".to_string(), task(2));
        tasks
    }

    fn load(tasks: &BTreeMap<String, TaskConfig>) -> Result<TaskRegistry, ConfigError> {
        TaskRegistry::load(tasks, executables(), serviced())
    }

    #[test]
    fn alias_shares_executable_but_keeps_own_settings() {
        let registry = load(&standard_tasks()).unwrap();

        let original = registry.resolve("GetFaces").unwrap();
        let alias = registry.resolve("GetFaces2").unwrap();

        assert!(Arc::ptr_eq(&original.executable, &alias.executable));
        assert_eq!(alias.alias_of.as_deref(), Some("GetFaces"));
        assert_eq!(alias.class, PriorityClass::ANALYSIS);
        assert_eq!(alias.input_key, ResultKey::from("obj"));
        assert_eq!(alias.ringctrl, RingCtrl::Full);
        assert_eq!(original.input_key, ResultKey::from("trk"));
        assert_eq!(original.ringctrl, RingCtrl::Trk);
        assert_eq!(alias.chain_target.as_deref(), Some("FaceRecon"));
    }

    #[test]
    fn executable_default_input_applies_without_trk_type() {
        let registry = load(&standard_tasks()).unwrap();
        assert_eq!(registry.resolve("FaceRecon").unwrap().input_key, ResultKey::from("fd1"));
    }

    #[test]
    fn nested_alias_is_rejected() {
        let mut tasks = standard_tasks();
        tasks.insert(
            "GetFaces3".into(),
            TaskConfig {
                alias: Some("GetFaces2".into()),
                ..task(2)
            },
        );
        let err = load(&tasks).err().unwrap();
        assert!(matches!(err, ConfigError::NestedAlias { alias, target } if alias == "GetFaces3" && target == "GetFaces2"));
    }

    #[test]
    fn alias_to_unknown_task_is_rejected() {
        let mut tasks = standard_tasks();
        tasks.insert(
            "Ghost".into(),
            TaskConfig {
                alias: Some("Missing".into()),
                ..task(1)
            },
        );
        assert!(matches!(load(&tasks).err().unwrap(), ConfigError::UnknownAliasTarget { .. }));
    }

    #[test]
    fn concrete_task_without_executable_is_rejected() {
        let mut tasks = standard_tasks();
        tasks.insert("Unregistered".into(), task(1));
        assert!(matches!(
            load(&tasks).err().unwrap(),
            ConfigError::UnknownExecutable { task } if task == "Unregistered"
        ));
    }

    #[test]
    fn chain_to_unknown_task_is_rejected() {
        let mut tasks = standard_tasks();
        tasks.get_mut("FaceRecon").unwrap().chain = Some("Nowhere".into());
        assert!(matches!(load(&tasks).err().unwrap(), ConfigError::UnknownChainTarget { .. }));
    }

    #[test]
    fn chain_cycle_is_rejected() {
        let mut tasks = standard_tasks();
        tasks.get_mut("FaceRecon").unwrap().chain = Some("GetFaces".into());
        let err = load(&tasks).err().unwrap();
        assert!(matches!(
            err,
            ConfigError::ChainCycle(path) if path == vec!["FaceRecon", "GetFaces", "FaceRecon"]
        ));
    }

    #[rstest]
    #[case::zero(0)]
    #[case::unserviced(3)]
    fn bad_class_is_rejected(#[case] class: u8) {
        let mut tasks = standard_tasks();
        tasks.get_mut("FaceRecon").unwrap().class = class;
        let err = load(&tasks).err().unwrap();
        assert!(matches!(
            err,
            ConfigError::InvalidClass { .. } | ConfigError::UnservicedClass { .. }
        ));
    }

    #[test]
    fn reload_swaps_snapshot_and_old_one_survives() {
        let registry = load(&standard_tasks()).unwrap();
        let before = registry.snapshot();

        let mut tasks = standard_tasks();
        tasks.get_mut("GetFaces").unwrap().chain = None;
        assert_eq!(registry.reload(&tasks).unwrap(), 2);

        assert_eq!(registry.snapshot().version(), 2);
        assert!(registry.resolve("GetFaces").unwrap().chain_target.is_none());
        assert_eq!(
            before.resolve("GetFaces").unwrap().chain_target.as_deref(),
            Some("FaceRecon")
        );
    }

    #[test]
    fn failed_reload_keeps_current_snapshot() {
        let registry = load(&standard_tasks()).unwrap();
        let mut tasks = standard_tasks();
        tasks.get_mut("FaceRecon").unwrap().chain = Some("GetFaces".into());

        assert!(registry.reload(&tasks).is_err());
        assert_eq!(registry.snapshot().version(), 1);
        assert!(registry.resolve("FaceRecon").unwrap().chain_target.is_none());
    }

    #[test]
    fn unparsable_params_fail_load_and_reload_alike() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "min_confidence = \"high\"\n").unwrap();

        let mut registry = ExecutableRegistry::new();
        registry.register(crate::tasks::GetObjects).unwrap();
        let executables = Arc::new(registry);

        let mut good = BTreeMap::new();
        good.insert("GetObjects".to_string(), task(1));
        let mut tuned = good.clone();
        tuned.get_mut("GetObjects").unwrap().config = Some(bad);

        let err = TaskRegistry::load(&tuned, executables.clone(), serviced()).err().unwrap();
        assert!(matches!(&err, ConfigError::TaskParams { task, .. } if task == "GetObjects"));

        let registry = TaskRegistry::load(&good, executables, serviced()).unwrap();
        let err = registry.reload(&tuned).unwrap_err();
        assert!(matches!(err, ConfigError::TaskParams { .. }));
        assert_eq!(registry.snapshot().version(), 1);
        assert!(registry.resolve("GetObjects").unwrap().config.is_none());
    }
}
