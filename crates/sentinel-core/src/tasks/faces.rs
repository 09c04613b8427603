//! GetFaces - face detection inside upstream person tracks.
//!
//! The input set (`trk` by default, `obj` for an alias fed by `GetObjects`)
//! supplies the regions to search. Frames without a person are searched
//! whole under `ringctrl = full` and skipped under `ringctrl = trk`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::app::context::TaskContext;
use crate::domain::{BoundingBox, FaceDetection, Record, TaskError};
use crate::typed::{Executable, TaskOutput};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaceParams {
    pub model: String,
    pub min_confidence: f32,
    pub output: String,
    pub person_class: String,
}

impl Default for FaceParams {
    fn default() -> Self {
        Self {
            model: "faces".to_string(),
            min_confidence: 0.5,
            output: "fd1".to_string(),
            person_class: "person".to_string(),
        }
    }
}

pub struct GetFaces;

#[async_trait]
impl Executable for GetFaces {
    const NAME: &'static str = "GetFaces";
    type Params = FaceParams;

    async fn run(&self, ctx: &mut TaskContext<'_>, params: &FaceParams) -> Result<TaskOutput, TaskError> {
        let input = ctx.input().await?;
        let mut rois: BTreeMap<u32, Vec<BoundingBox>> = BTreeMap::new();
        for track in input.tracks().filter(|t| t.class_name == params.person_class) {
            rois.entry(track.frame).or_default().push(track.bbox);
        }

        let mut out = ctx.result_set(&params.output)?;
        for meta in ctx.frames_to_load(Some(&input)).await? {
            let regions: Vec<Option<BoundingBox>> = match rois.get(&meta.index) {
                Some(boxes) => boxes.iter().copied().map(Some).collect(),
                None => vec![None],
            };
            let frame = ctx.load_frame(&meta).await?;
            for roi in regions {
                let inference = ctx.infer(&params.model, &frame, roi)?;
                for det in inference.detections {
                    if det.confidence < params.min_confidence {
                        continue;
                    }
                    let bbox = roi.map_or(det.bbox, |r| r.offset(det.bbox));
                    out.push(Record::FaceDetection(FaceDetection {
                        frame: meta.index,
                        bbox,
                        confidence: det.confidence,
                    }))?;
                }
            }
        }

        tracing::debug!(faces = out.len(), input = %input.key(), "faces detected");
        Ok(TaskOutput::with_set(out))
    }
}
