//! Identity store: per-identity embedding baselines.
//!
//! Shared by `FaceRecon` (readers) and `FaceDataUpdate` (the only writer).
//! A writer that cannot get the lock within `write_timeout` fails with
//! `IdentityStoreBusy` instead of queueing behind another writer forever.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::IdentityConfig;
use crate::domain::{ConfigError, TaskError};

/// Where an identity's embeddings cluster, and how far from it still counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub centroid: Vec<f32>,
    pub threshold: f32,
    #[serde(default)]
    pub samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest<'a> {
    pub label: &'a str,
    pub distance: f32,
    pub threshold: f32,
}

impl Nearest<'_> {
    pub fn within_threshold(&self) -> bool {
        self.distance <= self.threshold
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Baselines {
    identities: BTreeMap<String, Baseline>,
}

impl Baselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, baseline: Baseline) {
        self.identities.insert(label.into(), baseline);
    }

    pub fn get(&self, label: &str) -> Option<&Baseline> {
        self.identities.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Baseline)> {
        self.identities.iter().map(|(l, b)| (l.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn distance_to(&self, label: &str, embedding: &[f32]) -> Option<f32> {
        self.get(label).map(|b| euclidean(&b.centroid, embedding))
    }

    /// Closest baseline to `embedding`, ties broken by label order.
    pub fn nearest(&self, embedding: &[f32]) -> Option<Nearest<'_>> {
        self.iter()
            .map(|(label, b)| Nearest {
                label,
                distance: euclidean(&b.centroid, embedding),
                threshold: b.threshold,
            })
            .fold(None, |best: Option<Nearest<'_>>, n| match best {
                Some(b) if b.distance <= n.distance => Some(b),
                _ => Some(n),
            })
    }

    /// Fold `embedding` into `label`'s running-mean centroid. Returns `false`
    /// for unknown labels or mismatched dimensions.
    pub fn absorb(&mut self, label: &str, embedding: &[f32]) -> bool {
        let Some(baseline) = self.identities.get_mut(label) else {
            return false;
        };
        if baseline.centroid.len() != embedding.len() {
            return false;
        }
        let n = baseline.samples.max(1) as f32;
        for (c, e) in baseline.centroid.iter_mut().zip(embedding) {
            *c = (*c * n + e) / (n + 1.0);
        }
        baseline.samples = baseline.samples.max(1) + 1;
        true
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let err = |message: String| ConfigError::Baselines {
            path: path.to_path_buf(),
            message,
        };
        let text = fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| err(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
    }
}

/// Euclidean distance. Embeddings of different length are infinitely far apart.
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub probability: f32,
}

/// Trained classifier over embeddings.
pub trait Classifier: Send + Sync {
    fn classify(&self, embedding: &[f32], baselines: &Baselines) -> Option<Classification>;
}

/// Softmax over negative centroid distances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CentroidClassifier {
    /// Higher is sharper.
    pub temperature: f32,
}

impl Default for CentroidClassifier {
    fn default() -> Self {
        Self { temperature: 10.0 }
    }
}

impl Classifier for CentroidClassifier {
    fn classify(&self, embedding: &[f32], baselines: &Baselines) -> Option<Classification> {
        let scores: Vec<(&str, f32)> = baselines
            .iter()
            .map(|(label, b)| (label, -euclidean(&b.centroid, embedding) * self.temperature))
            .filter(|(_, s)| s.is_finite())
            .collect();
        let max = scores.iter().map(|(_, s)| *s).fold(f32::NEG_INFINITY, f32::max);
        let total: f32 = scores.iter().map(|(_, s)| (s - max).exp()).sum();
        let (label, best) = scores
            .iter()
            .copied()
            .fold(None, |acc: Option<(&str, f32)>, (l, s)| match acc {
                Some((_, bs)) if bs >= s => acc,
                _ => Some((l, s)),
            })?;
        Some(Classification {
            label: label.to_string(),
            probability: (best - max).exp() / total,
        })
    }
}

pub struct IdentityStore {
    baselines: RwLock<Baselines>,
    path: Option<PathBuf>,
    write_timeout: Duration,
}

impl IdentityStore {
    pub fn new(baselines: Baselines, path: Option<PathBuf>, write_timeout: Duration) -> Self {
        Self {
            baselines: RwLock::new(baselines),
            path,
            write_timeout,
        }
    }

    /// A configured but missing file starts an empty store that `persist` will create.
    pub fn load(config: &IdentityConfig) -> Result<Self, ConfigError> {
        let baselines = match &config.baselines {
            Some(path) if path.exists() => Baselines::load(path)?,
            _ => Baselines::new(),
        };
        tracing::info!(identities = baselines.len(), "identity baselines loaded");
        Ok(Self::new(baselines, config.baselines.clone(), config.write_timeout()))
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Baselines> {
        self.baselines.read().await
    }

    pub async fn write(&self) -> Result<RwLockWriteGuard<'_, Baselines>, TaskError> {
        tokio::time::timeout(self.write_timeout, self.baselines.write())
            .await
            .map_err(|_| TaskError::IdentityStoreBusy {
                waited: self.write_timeout,
            })
    }

    /// Write `baselines` to the backing file, if there is one.
    pub fn persist(&self, baselines: &Baselines) -> Result<(), TaskError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        baselines.save(path).map_err(|e| {
            TaskError::Execution(format!("cannot write baselines {}: {e}", path.display()))
        })
    }
}
