//! Result sets produced by tasks.
//!
//! A result set is keyed by a short string (`trk`, `obj`, `fd1`, `fr1`,
//! `spd1`, ...). The key alone fixes the record schema, so `fd1` written by
//! `GetFaces` and by its alias `GetFaces2` are interchangeable for whoever
//! reads them next.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::event::EventRef;

/// Name of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultKey(String);

impl ResultKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `None` when the key follows no known naming scheme.
    pub fn schema(&self) -> Option<RecordSchema> {
        let key = self.0.as_str();
        if key == "trk" || key.starts_with("obj") {
            Some(RecordSchema::Tracking)
        } else if key.starts_with("fd") {
            Some(RecordSchema::FaceDetection)
        } else if key.starts_with("fr") {
            Some(RecordSchema::Face)
        } else if key.starts_with("spd") {
            Some(RecordSchema::Speed)
        } else {
            None
        }
    }
}

impl Default for ResultKey {
    fn default() -> Self {
        Self::new("trk")
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ResultKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSchema {
    Tracking,
    FaceDetection,
    Face,
    Speed,
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Translate a box expressed relative to `self` into frame coordinates.
    pub fn offset(&self, inner: BoundingBox) -> BoundingBox {
        BoundingBox::new(self.x + inner.x, self.y + inner.y, inner.width, inner.height)
    }
}

/// One tracked (or detected) object in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub frame: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u32>,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub frame: u32,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Why a face capture is worth a human's attention for future training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum Curation {
    /// Confidently recognised; feed back into this identity's training set.
    Training,
    /// Far from every known baseline.
    NewIndividual,
    /// Close to this identity's baseline but the classifier was unsure.
    Refine(String),
}

/// Identity assigned to a face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn label(&self) -> Option<&str> {
        match self {
            Identity::Known(label) => Some(label),
            Identity::Unknown => None,
        }
    }
}

/// Element of an `fr*` result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub frame: u32,
    pub bbox: BoundingBox,
    pub identity: Identity,
    pub probability: f32,
    pub distance: f32,
    pub usable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curation: Option<Curation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

/// Element of an `spd*` result set: one vehicle track's estimated speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedRecord {
    pub track_id: u32,
    pub class_name: String,
    pub first_frame: u32,
    pub last_frame: u32,
    pub speed_kph: f32,
    pub violation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum Record {
    Tracking(TrackRecord),
    FaceDetection(FaceDetection),
    Face(FaceRecord),
    Speed(SpeedRecord),
}

impl Record {
    pub fn schema(&self) -> RecordSchema {
        match self {
            Record::Tracking(_) => RecordSchema::Tracking,
            Record::FaceDetection(_) => RecordSchema::FaceDetection,
            Record::Face(_) => RecordSchema::Face,
            Record::Speed(_) => RecordSchema::Speed,
        }
    }

    pub fn frame(&self) -> Option<u32> {
        match self {
            Record::Tracking(r) => Some(r.frame),
            Record::FaceDetection(r) => Some(r.frame),
            Record::Face(r) => Some(r.frame),
            Record::Speed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("result key '{0}' follows no known schema")]
    UnknownKey(ResultKey),

    #[error("result key '{key}' holds {expected:?} records, got {got:?}")]
    Mismatch {
        key: ResultKey,
        expected: RecordSchema,
        got: RecordSchema,
    },
}

/// Ordered records of one key for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingResultSet {
    key: ResultKey,
    schema: RecordSchema,
    event: EventRef,
    records: Vec<Record>,
}

impl TrackingResultSet {
    pub fn new(key: ResultKey, event: EventRef) -> Result<Self, SchemaError> {
        let schema = key.schema().ok_or_else(|| SchemaError::UnknownKey(key.clone()))?;
        Ok(Self {
            key,
            schema,
            event,
            records: Vec::new(),
        })
    }

    pub fn push(&mut self, record: Record) -> Result<(), SchemaError> {
        if record.schema() != self.schema {
            return Err(SchemaError::Mismatch {
                key: self.key.clone(),
                expected: self.schema,
                got: record.schema(),
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn key(&self) -> &ResultKey {
        &self.key
    }

    pub fn schema(&self) -> RecordSchema {
        self.schema
    }

    pub fn event(&self) -> &EventRef {
        &self.event
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackRecord> {
        self.records.iter().filter_map(|r| match r {
            Record::Tracking(t) => Some(t),
            _ => None,
        })
    }

    pub fn face_detections(&self) -> impl Iterator<Item = &FaceDetection> {
        self.records.iter().filter_map(|r| match r {
            Record::FaceDetection(f) => Some(f),
            _ => None,
        })
    }

    pub fn faces(&self) -> impl Iterator<Item = &FaceRecord> {
        self.records.iter().filter_map(|r| match r {
            Record::Face(f) => Some(f),
            _ => None,
        })
    }

    pub fn speeds(&self) -> impl Iterator<Item = &SpeedRecord> {
        self.records.iter().filter_map(|r| match r {
            Record::Speed(s) => Some(s),
            _ => None,
        })
    }

    /// Distinct frame numbers referenced by the records, ascending.
    pub fn frames(&self) -> Vec<u32> {
        let mut frames: Vec<u32> = self.records.iter().filter_map(Record::frame).collect();
        frames.sort_unstable();
        frames.dedup();
        frames
    }
}
