//! FaceRecon - embed every detected face and decide who it is.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::identity::{CentroidClassifier, Classifier};
use super::recognition::{RecognitionEnsemble, RecognitionPolicy};
use crate::app::context::TaskContext;
use crate::domain::{BoundingBox, FaceRecord, Record, TaskError};
use crate::typed::{Executable, TaskOutput};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconParams {
    /// Embedding model.
    pub model: String,
    pub output: String,
    pub policy: RecognitionPolicy,
    pub classifier: CentroidClassifier,
}

impl Default for ReconParams {
    fn default() -> Self {
        Self {
            model: "facenet".to_string(),
            output: "fr1".to_string(),
            policy: RecognitionPolicy::default(),
            classifier: CentroidClassifier::default(),
        }
    }
}

pub struct FaceRecon;

#[async_trait]
impl Executable for FaceRecon {
    const NAME: &'static str = "FaceRecon";
    const DEFAULT_INPUT: &'static str = "fd1";
    type Params = ReconParams;

    async fn run(&self, ctx: &mut TaskContext<'_>, params: &ReconParams) -> Result<TaskOutput, TaskError> {
        let input = ctx.input().await?;
        let mut faces: BTreeMap<u32, Vec<BoundingBox>> = BTreeMap::new();
        for det in input.face_detections() {
            faces.entry(det.frame).or_default().push(det.bbox);
        }

        let ensemble = RecognitionEnsemble::new(params.policy);
        let mut out = ctx.result_set(&params.output)?;
        let mut known = 0usize;

        for meta in ctx.frames_to_load(Some(&input)).await? {
            let Some(boxes) = faces.get(&meta.index) else {
                continue;
            };
            let frame = ctx.load_frame(&meta).await?;
            for &bbox in boxes {
                let embedding = ctx
                    .infer(&params.model, &frame, Some(bbox))?
                    .embedding
                    .ok_or_else(|| TaskError::Model {
                        model: params.model.clone(),
                        message: "no embedding in output".to_string(),
                    })?;

                let decision = {
                    let baselines = ctx.identity().read().await;
                    let classification = params.classifier.classify(&embedding, &baselines);
                    ensemble.decide(classification.as_ref(), &embedding, &baselines)
                };
                if decision.identity.label().is_some() {
                    known += 1;
                }
                out.push(Record::Face(FaceRecord {
                    frame: meta.index,
                    bbox,
                    identity: decision.identity,
                    probability: decision.probability,
                    distance: decision.distance,
                    usable: decision.usable,
                    curation: decision.curation,
                    embedding,
                }))?;
            }
        }

        tracing::debug!(faces = out.len(), known, "faces recognised");
        Ok(TaskOutput::with_set(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::Inference;
    use crate::domain::{Curation, FaceDetection, Identity, JobTarget, ResultKey, TrackingResultSet};
    use crate::tasks::identity::{Baseline, Baselines, IdentityStore};
    use crate::testing::{TaskHarness, event, task_config};
    use std::sync::Arc;
    use std::time::Duration;

    fn embedding(v: [f32; 2]) -> Inference {
        Inference {
            detections: Vec::new(),
            embedding: Some(v.to_vec()),
        }
    }

    fn harness_with_alice() -> TaskHarness {
        let mut baselines = Baselines::new();
        baselines.insert(
            "alice",
            Baseline {
                centroid: vec![0.0, 0.0],
                threshold: 0.5,
                samples: 3,
            },
        );
        let mut h = TaskHarness::new();
        h.services.identity = Arc::new(IdentityStore::new(baselines, None, Duration::from_millis(50)));
        h
    }

    fn detections(ev: &crate::domain::EventRef, frames: &[u32]) -> TrackingResultSet {
        let mut set = TrackingResultSet::new(ResultKey::from("fd1"), ev.clone()).unwrap();
        for &frame in frames {
            set.push(Record::FaceDetection(FaceDetection {
                frame,
                bbox: BoundingBox::new(1.0, 1.0, 4.0, 4.0),
                confidence: 0.9,
            }))
            .unwrap();
        }
        set
    }

    #[tokio::test]
    async fn known_and_new_faces_are_told_apart() {
        let mut h = harness_with_alice();
        let ev = event("gate", "front", 10);
        h.data.add_event(ev.clone(), 3, 64, 48);
        h.data.put(detections(&ev, &[0, 2]));
        h.script.respond_frame("facenet", 0, embedding([0.01, 0.0]));
        h.script.respond_frame("facenet", 2, embedding([5.0, 5.0]));

        let out = h
            .run(&FaceRecon, &ReconParams::default(), task_config(2), JobTarget::Event(ev))
            .await
            .unwrap();

        let faces: Vec<_> = out.result_sets[0].faces().cloned().collect();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].identity, Identity::Known("alice".into()));
        assert!(faces[0].usable);
        assert_eq!(faces[1].identity, Identity::Unknown);
        assert_eq!(faces[1].curation, Some(Curation::NewIndividual));
        assert_eq!(faces[1].embedding, vec![5.0, 5.0]);
        // only frames with faces are decoded
        assert!(h.script.calls().iter().all(|c| c.frame != 1));
    }

    #[tokio::test]
    async fn missing_embedding_is_model_error() {
        let mut h = harness_with_alice();
        let ev = event("gate", "front", 10);
        h.data.add_event(ev.clone(), 1, 64, 48);
        h.data.put(detections(&ev, &[0]));

        let err = h
            .run(&FaceRecon, &ReconParams::default(), task_config(2), JobTarget::Event(ev))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Model { .. }));
        assert!(!err.degrades_engine());
    }
}
