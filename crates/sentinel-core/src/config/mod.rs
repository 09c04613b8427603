//! TOML configuration.
//!
//! One file describes the whole engine set: scheduler knobs, logging,
//! ring-buffer models, engines (in declaration order), task definitions and
//! the initial outpost subscriptions. Relative paths inside the file are
//! resolved against the file's directory by [`SentinelConfig::load`].
//!
//! Structural checks on engines and ring models live here; task-level checks
//! (aliases, chains, classes) belong to the task registry, which needs the
//! executable registry to run them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accelerator::AcceleratorKind;
use crate::domain::{ConfigError, PriorityClass};
use crate::observability::LogFormat;
use crate::ring::RingCtrl;

/// Environment variable the CLI falls back to when `--config` is absent.
pub const CONFIG_ENV: &str = "SENTINEL_CONFIG";

pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub ring_buffers: BTreeMap<String, RingBufferConfig>,
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
    #[serde(default)]
    pub outposts: Vec<OutpostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a task waits for a free ring buffer.
    pub buffer_timeout_ms: u64,
    pub models_dir: PathBuf,
    /// Job records kept for queries; the oldest settled ones go first.
    pub ledger_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            buffer_timeout_ms: 5_000,
            models_dir: PathBuf::from("models"),
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// JSON file of per-identity baselines. Absent means an empty store.
    pub baselines: Option<PathBuf>,
    pub write_timeout_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            baselines: None,
            write_timeout_ms: 2_000,
        }
    }
}

impl IdentityConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub min_face_ratio: f64,
    pub keep_confidence: f32,
    pub run_deletes: bool,
    /// Node name -> result keys whose presence alone makes an event worth keeping.
    pub node_signals: BTreeMap<String, Vec<String>>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            min_face_ratio: 0.25,
            keep_confidence: 0.99,
            run_deletes: false,
            node_signals: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBufferConfig {
    pub sizes: Vec<SizeClassConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizeClassConfig {
    pub width: u32,
    pub height: u32,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub name: String,
    pub classes: Vec<u8>,
    pub ring_buffers: String,
    pub accelerator: AcceleratorKind,
}

/// One `[tasks.<name>]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Name of the task whose executable this one reuses.
    #[serde(default)]
    pub alias: Option<String>,
    /// TOML parameter file handed to the executable.
    #[serde(default)]
    pub config: Option<PathBuf>,
    #[serde(default)]
    pub chain: Option<String>,
    pub class: u8,
    #[serde(default)]
    pub trk_type: Option<String>,
    #[serde(default)]
    pub ringctrl: RingCtrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutpostConfig {
    pub node: String,
    pub view: String,
    pub tasks: Vec<String>,
}

impl SentinelConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: SentinelConfig =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate without touching the filesystem. Paths stay as written.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SentinelConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.scheduler.models_dir);
        if let Some(p) = self.identity.baselines.as_mut() {
            join(p);
        }
        for task in self.tasks.values_mut() {
            if let Some(p) = task.config.as_mut() {
                join(p);
            }
        }
    }

    /// Engine, ring-model and outpost checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.ledger_capacity == 0 {
            return Err(ConfigError::ZeroLedgerCapacity);
        }

        for (model, ring) in &self.ring_buffers {
            if ring.sizes.is_empty() {
                return Err(ConfigError::EmptyRingModel {
                    model: model.clone(),
                });
            }
            if let Some(size) = ring.sizes.iter().find(|s| s.depth == 0) {
                return Err(ConfigError::ZeroDepth {
                    model: model.clone(),
                    width: size.width,
                    height: size.height,
                });
            }
        }

        let mut names = BTreeSet::new();
        for engine in &self.engines {
            if !names.insert(engine.name.as_str()) {
                return Err(ConfigError::DuplicateEngine(engine.name.clone()));
            }
            if engine.classes.is_empty() {
                return Err(ConfigError::EmptyEngineClasses {
                    engine: engine.name.clone(),
                });
            }
            if let Some(&value) = engine.classes.iter().find(|&&c| c == 0) {
                return Err(ConfigError::InvalidEngineClass {
                    engine: engine.name.clone(),
                    value,
                });
            }
            if !self.ring_buffers.contains_key(&engine.ring_buffers) {
                return Err(ConfigError::UnknownRingModel {
                    engine: engine.name.clone(),
                    model: engine.ring_buffers.clone(),
                });
            }
        }

        for outpost in &self.outposts {
            if let Some(task) = outpost.tasks.iter().find(|t| !self.tasks.contains_key(*t)) {
                return Err(ConfigError::UnknownSubscribedTask {
                    node: outpost.node.clone(),
                    view: outpost.view.clone(),
                    task: task.clone(),
                });
            }
        }
        Ok(())
    }

    /// Classes serviced by at least one engine.
    pub fn serviced_classes(&self) -> BTreeSet<PriorityClass> {
        self.engines
            .iter()
            .flat_map(|e| e.classes.iter().copied())
            .filter_map(PriorityClass::new)
            .collect()
    }
}

impl EngineConfig {
    pub fn priority_classes(&self) -> BTreeSet<PriorityClass> {
        self.classes.iter().copied().filter_map(PriorityClass::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[scheduler]
buffer_timeout_ms = 250

[logging]
level = "debug"
format = "pretty"

[retention]
run_deletes = true
[retention.node_signals]
gate = ["spd1"]

[ring_buffers.hd]
sizes = [{ width = 1920, height = 1080, depth = 4 }, { width = 640, height = 480, depth = 8 }]

[[engines]]
name = "Alpha"
classes = [1]
ring_buffers = "hd"
accelerator = "coral"

[[engines]]
name = "Beta"
classes = [2, 3]
ring_buffers = "hd"
accelerator = "cpu"

[tasks.GetFaces]
class = 1
chain = "FaceRecon"
ringctrl = "trk"
config = "params/faces.toml"

[tasks.GetFaces2]
alias = "GetFaces"
class = 2
trk_type = "obj"
chain = "FaceRecon"

[tasks.FaceRecon]
class = 2

[[outposts]]
node = "gate"
view = "front"
tasks = ["GetFaces"]
"#;

    #[test]
    fn parses_full_example() {
        let config = SentinelConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.scheduler.buffer_timeout(), Duration::from_millis(250));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.retention.run_deletes);
        assert_eq!(config.retention.min_face_ratio, 0.25);
        assert_eq!(config.engines[0].name, "Alpha");
        assert_eq!(config.engines[1].accelerator, AcceleratorKind::Cpu);
        assert_eq!(config.tasks["GetFaces"].ringctrl, RingCtrl::Trk);
        assert_eq!(config.tasks["GetFaces2"].alias.as_deref(), Some("GetFaces"));
        assert_eq!(config.tasks["FaceRecon"].ringctrl, RingCtrl::Full);
        assert_eq!(
            config.serviced_classes(),
            [1, 2, 3].into_iter().filter_map(PriorityClass::new).collect()
        );
    }

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = SentinelConfig::from_toml_str("").unwrap();
        assert_eq!(config.scheduler.buffer_timeout_ms, 5_000);
        assert_eq!(config.scheduler.ledger_capacity, DEFAULT_LEDGER_CAPACITY);
        assert_eq!(config.identity.write_timeout(), Duration::from_secs(2));
        assert!(!config.retention.run_deletes);
        assert!(config.engines.is_empty());
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(
            config.tasks["GetFaces"].config.as_deref(),
            Some(dir.path().join("params/faces.toml").as_path())
        );
        assert_eq!(config.scheduler.models_dir, dir.path().join("models"));
    }

    #[test]
    fn rejects_zero_ledger_capacity() {
        let err = SentinelConfig::from_toml_str("[scheduler]\nledger_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroLedgerCapacity));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SentinelConfig::load("/nonexistent/sentinel.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn rejects_engine_with_no_classes() {
        let text = r#"
[ring_buffers.hd]
sizes = [{ width = 64, height = 64, depth = 1 }]
[[engines]]
name = "Alpha"
classes = []
ring_buffers = "hd"
accelerator = "cpu"
"#;
        let err = SentinelConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyEngineClasses { engine } if engine == "Alpha"));
    }

    #[test]
    fn rejects_unknown_ring_model() {
        let text = r#"
[[engines]]
name = "Alpha"
classes = [1]
ring_buffers = "missing"
accelerator = "cpu"
"#;
        let err = SentinelConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRingModel { model, .. } if model == "missing"));
    }

    #[test]
    fn rejects_zero_depth() {
        let text = r#"
[ring_buffers.hd]
sizes = [{ width = 64, height = 64, depth = 0 }]
"#;
        let err = SentinelConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDepth { width: 64, .. }));
    }

    #[test]
    fn rejects_duplicate_engine_names() {
        let text = r#"
[ring_buffers.hd]
sizes = [{ width = 64, height = 64, depth = 1 }]
[[engines]]
name = "Alpha"
classes = [1]
ring_buffers = "hd"
accelerator = "cpu"
[[engines]]
name = "Alpha"
classes = [2]
ring_buffers = "hd"
accelerator = "cpu"
"#;
        let err = SentinelConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEngine(name) if name == "Alpha"));
    }

    #[test]
    fn rejects_subscription_to_unknown_task() {
        let text = r#"
[[outposts]]
node = "gate"
view = "front"
tasks = ["Nope"]
"#;
        let err = SentinelConfig::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSubscribedTask { task, .. } if task == "Nope"));
    }
}
