//! FaceDataUpdate - fold training-grade faces back into the baselines.
//!
//! Runs against one event (chained after `FaceRecon`) or a whole day. Only
//! faces the ensemble marked usable training material for a known identity
//! are absorbed. This is the identity store's only writer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::context::TaskContext;
use crate::domain::{Curation, FaceRecord, JobTarget, TaskError};
use crate::typed::{Executable, TaskOutput};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateParams {
    /// Also count faces flagged as new individuals in the summary.
    pub report_new_individuals: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub events: usize,
    pub absorbed: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_individuals: Option<usize>,
}

pub struct FaceDataUpdate;

#[async_trait]
impl Executable for FaceDataUpdate {
    const NAME: &'static str = "FaceDataUpdate";
    const DEFAULT_INPUT: &'static str = "fr1";
    type Params = UpdateParams;

    async fn run(&self, ctx: &mut TaskContext<'_>, params: &UpdateParams) -> Result<TaskOutput, TaskError> {
        let events = match &ctx.job().target {
            JobTarget::Event(event) => vec![event.clone()],
            JobTarget::Date(date) => ctx.data().events_on(*date).await?,
        };

        let mut faces: Vec<FaceRecord> = Vec::new();
        for event in &events {
            if let Some(set) = ctx.data().result_set(event, ctx.input_key()).await? {
                faces.extend(set.faces().cloned());
            }
        }

        let mut summary = UpdateSummary {
            events: events.len(),
            new_individuals: params.report_new_individuals.then(|| {
                faces
                    .iter()
                    .filter(|f| f.curation == Some(Curation::NewIndividual))
                    .count()
            }),
            ..UpdateSummary::default()
        };

        {
            let mut baselines = ctx.identity().write().await?;
            for face in &faces {
                let training = face.usable && face.curation == Some(Curation::Training);
                let absorbed = training
                    && face
                        .identity
                        .label()
                        .is_some_and(|label| baselines.absorb(label, &face.embedding));
                if absorbed {
                    summary.absorbed += 1;
                } else {
                    summary.skipped += 1;
                }
            }
            if summary.absorbed > 0 {
                ctx.identity().persist(&baselines)?;
            }
        }

        tracing::info!(
            events = summary.events,
            absorbed = summary.absorbed,
            skipped = summary.skipped,
            "identity baselines updated"
        );
        let value = serde_json::to_value(&summary).map_err(|e| TaskError::Execution(e.to_string()))?;
        Ok(TaskOutput::empty().summary(value))
    }
}
