//! GetObjects - run an object detector over an event's frames.

use async_trait::async_trait;
use serde::Deserialize;

use crate::app::context::TaskContext;
use crate::domain::{Record, TaskError, TrackRecord};
use crate::typed::{Executable, TaskOutput};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObjectParams {
    pub model: String,
    pub min_confidence: f32,
    pub output: String,
    /// Empty keeps every class.
    pub classes: Vec<String>,
}

impl Default for ObjectParams {
    fn default() -> Self {
        Self {
            model: "objects".to_string(),
            min_confidence: 0.4,
            output: "obj".to_string(),
            classes: Vec::new(),
        }
    }
}

pub struct GetObjects;

#[async_trait]
impl Executable for GetObjects {
    const NAME: &'static str = "GetObjects";
    type Params = ObjectParams;

    async fn run(&self, ctx: &mut TaskContext<'_>, params: &ObjectParams) -> Result<TaskOutput, TaskError> {
        let mut out = ctx.result_set(&params.output)?;
        let (_, frames) = super::scoped_frames(ctx).await?;

        for meta in &frames {
            let frame = ctx.load_frame(meta).await?;
            let inference = ctx.infer(&params.model, &frame, None)?;
            for det in inference.detections {
                if det.confidence < params.min_confidence
                    || (!params.classes.is_empty() && !params.classes.contains(&det.class_name))
                {
                    continue;
                }
                out.push(Record::Tracking(TrackRecord {
                    frame: meta.index,
                    track_id: None,
                    class_name: det.class_name,
                    confidence: det.confidence,
                    bbox: det.bbox,
                }))?;
            }
        }

        tracing::debug!(frames = frames.len(), objects = out.len(), "objects detected");
        Ok(TaskOutput::with_set(out))
    }
}
