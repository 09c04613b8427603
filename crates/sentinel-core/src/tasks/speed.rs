//! VehicleSpeed - speed estimate per vehicle track.
//!
//! Pure geometry over the upstream tracks and frame timestamps: no frames
//! are decoded and the accelerator is not used. Distance is the centre
//! displacement between a track's first and last appearance, converted with
//! the view's calibration (`pixels_per_meter`).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Deserialize;

use crate::app::context::TaskContext;
use crate::domain::{Record, SpeedRecord, TaskError, TrackRecord};
use crate::typed::{Executable, TaskOutput};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeedParams {
    pub pixels_per_meter: f32,
    pub speed_limit_kph: f32,
    pub vehicle_classes: Vec<String>,
    pub output: String,
}

impl Default for SpeedParams {
    fn default() -> Self {
        Self {
            pixels_per_meter: 50.0,
            speed_limit_kph: 50.0,
            vehicle_classes: ["car", "truck", "bus", "motorcycle"]
                .into_iter()
                .map(String::from)
                .collect(),
            output: "spd1".to_string(),
        }
    }
}

pub struct VehicleSpeed;

#[async_trait]
impl Executable for VehicleSpeed {
    const NAME: &'static str = "VehicleSpeed";
    type Params = SpeedParams;

    async fn run(&self, ctx: &mut TaskContext<'_>, params: &SpeedParams) -> Result<TaskOutput, TaskError> {
        if params.pixels_per_meter <= 0.0 {
            return Err(TaskError::Execution(format!(
                "pixels_per_meter must be positive, got {}",
                params.pixels_per_meter
            )));
        }
        let input = ctx.input().await?;
        let offsets: HashMap<u32, u64> = ctx
            .data()
            .frames(ctx.event()?)
            .await?
            .into_iter()
            .map(|f| (f.index, f.offset_ms))
            .collect();

        let mut tracks: BTreeMap<u32, Vec<&TrackRecord>> = BTreeMap::new();
        for t in input.tracks() {
            if let Some(id) = t.track_id
                && params.vehicle_classes.contains(&t.class_name)
            {
                tracks.entry(id).or_default().push(t);
            }
        }

        let mut out = ctx.result_set(&params.output)?;
        for (track_id, mut points) in tracks {
            points.sort_by_key(|t| t.frame);
            let (Some(first), Some(last)) = (points.first(), points.last()) else {
                continue;
            };
            let (Some(t0), Some(t1)) = (offsets.get(&first.frame), offsets.get(&last.frame)) else {
                tracing::warn!(track_id, "track references frames missing from the event");
                continue;
            };
            if t1 <= t0 {
                continue;
            }
            let speed_kph = speed_kph(first, last, *t1 - *t0, params.pixels_per_meter);
            out.push(Record::Speed(SpeedRecord {
                track_id,
                class_name: first.class_name.clone(),
                first_frame: first.frame,
                last_frame: last.frame,
                speed_kph,
                violation: speed_kph > params.speed_limit_kph,
            }))?;
        }

        let violations = out.speeds().filter(|s| s.violation).count();
        tracing::debug!(vehicles = out.len(), violations, "speeds estimated");
        Ok(TaskOutput::with_set(out))
    }
}

fn speed_kph(first: &TrackRecord, last: &TrackRecord, elapsed_ms: u64, pixels_per_meter: f32) -> f32 {
    let (x0, y0) = first.bbox.center();
    let (x1, y1) = last.bbox.center();
    let meters = (x1 - x0).hypot(y1 - y0) / pixels_per_meter;
    let seconds = elapsed_ms as f32 / 1000.0;
    meters / seconds * 3.6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BoundingBox, EventRef, JobTarget, ResultKey, TrackingResultSet};
    use crate::testing::{TaskHarness, event, task_config};

    fn track(frame: u32, track_id: u32, class_name: &str, x: f32) -> Record {
        Record::Tracking(TrackRecord {
            frame,
            track_id: Some(track_id),
            class_name: class_name.into(),
            confidence: 0.9,
            bbox: BoundingBox::new(x, 0.0, 10.0, 10.0),
        })
    }

    fn tracks(ev: &EventRef, rows: Vec<Record>) -> TrackingResultSet {
        let mut set = TrackingResultSet::new(ResultKey::default(), ev.clone()).unwrap();
        for r in rows {
            set.push(r).unwrap();
        }
        set
    }

    #[tokio::test]
    async fn flags_tracks_above_the_limit() {
        let mut h = TaskHarness::new();
        let ev = event("gate", "street", 10);
        // frames are 100 ms apart
        h.data.add_event(ev.clone(), 11, 64, 48);
        h.data.put(tracks(
            &ev,
            vec![
                // 20 m in 1 s = 72 km/h
                track(0, 1, "car", 0.0),
                track(10, 1, "car", 1000.0),
                // 5 m in 1 s = 18 km/h
                track(0, 2, "truck", 0.0),
                track(10, 2, "truck", 250.0),
                // pedestrians are ignored
                track(0, 3, "person", 0.0),
                track(10, 3, "person", 900.0),
            ],
        ));

        let out = h
            .run(&VehicleSpeed, &SpeedParams::default(), task_config(2), JobTarget::Event(ev))
            .await
            .unwrap();

        let speeds: Vec<_> = out.result_sets[0].speeds().cloned().collect();
        assert_eq!(speeds.len(), 2);
        assert!((speeds[0].speed_kph - 72.0).abs() < 0.01);
        assert!(speeds[0].violation);
        assert!((speeds[1].speed_kph - 18.0).abs() < 0.01);
        assert!(!speeds[1].violation);
        assert!(h.script.calls().is_empty());
    }

    #[tokio::test]
    async fn single_point_tracks_have_no_speed() {
        let mut h = TaskHarness::new();
        let ev = event("gate", "street", 10);
        h.data.add_event(ev.clone(), 2, 64, 48);
        h.data.put(tracks(&ev, vec![track(1, 1, "car", 0.0)]));

        let out = h
            .run(&VehicleSpeed, &SpeedParams::default(), task_config(2), JobTarget::Event(ev))
            .await
            .unwrap();
        assert!(out.result_sets[0].is_empty());
    }
}
