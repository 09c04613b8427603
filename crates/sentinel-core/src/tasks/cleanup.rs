//! DailyCleanup - retention sweep over one day of events.
//!
//! # Rules
//! 1. face ratio = events with at least one face detection / events.
//!    Below `min_face_ratio` the face pipeline is assumed broken for the day:
//!    the sweep fails with `RetentionFailsafeTripped` and deletes nothing.
//! 2. An event is kept when any recognised face has probability above
//!    `keep_confidence`, any speed record is a violation, or any of its
//!    node's signal keys holds records.
//! 3. Everything else is deleted, but only when `run_deletes` is set.
//!
//! Each decision is logged on the `sentinel::retention` target.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::app::context::TaskContext;
use crate::config::RetentionConfig;
use crate::domain::{EventRef, ResultKey, TaskError};
use crate::typed::{Executable, TaskOutput};

pub const RETENTION_TARGET: &str = "sentinel::retention";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupParams {
    pub face_key: String,
    pub recognition_key: String,
    pub speed_key: String,
}

impl Default for CleanupParams {
    fn default() -> Self {
        Self {
            face_key: "fd1".to_string(),
            recognition_key: "fr1".to_string(),
            speed_key: "spd1".to_string(),
        }
    }
}

/// What the data layer holds for one event, reduced to what retention needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEvidence {
    pub event: EventRef,
    pub faces_detected: usize,
    pub best_face_probability: Option<f32>,
    pub speed_violation: bool,
    /// Node signal keys that hold records for this event.
    pub signals: Vec<String>,
}

impl EventEvidence {
    pub fn empty(event: EventRef) -> Self {
        Self {
            event,
            faces_detected: 0,
            best_face_probability: None,
            speed_violation: false,
            signals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RetentionReason {
    ConfidentFace { probability: f32 },
    SpeedViolation,
    NodeSignal { key: String },
    NoEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionDecision {
    pub event: EventRef,
    pub keep: bool,
    #[serde(flatten)]
    pub reason: RetentionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub date: NaiveDate,
    pub events: usize,
    pub with_faces: usize,
    pub face_ratio: f64,
    pub decisions: Vec<RetentionDecision>,
    pub deleted: usize,
    pub dry_run: bool,
}

impl RetentionReport {
    pub fn kept(&self) -> usize {
        self.decisions.iter().filter(|d| d.keep).count()
    }
}

/// Apply the failsafe and keep rules. Deletes nothing itself.
pub fn evaluate_retention(
    date: NaiveDate,
    evidence: &[EventEvidence],
    config: &RetentionConfig,
) -> Result<RetentionReport, TaskError> {
    let events = evidence.len();
    let with_faces = evidence.iter().filter(|e| e.faces_detected > 0).count();
    let face_ratio = if events == 0 {
        1.0
    } else {
        with_faces as f64 / events as f64
    };

    if face_ratio < config.min_face_ratio {
        tracing::warn!(
            target: RETENTION_TARGET,
            %date,
            events,
            with_faces,
            face_ratio,
            threshold = config.min_face_ratio,
            "retention failsafe tripped; nothing deleted"
        );
        return Err(TaskError::RetentionFailsafeTripped {
            ratio: face_ratio,
            threshold: config.min_face_ratio,
            events,
        });
    }

    let decisions = evidence
        .iter()
        .map(|e| {
            let reason = keep_reason(e, config.keep_confidence);
            let keep = reason != RetentionReason::NoEvidence;
            tracing::info!(
                target: RETENTION_TARGET,
                event = %e.event,
                keep,
                reason = ?reason,
                "retention decision"
            );
            RetentionDecision {
                event: e.event.clone(),
                keep,
                reason,
            }
        })
        .collect();

    Ok(RetentionReport {
        date,
        events,
        with_faces,
        face_ratio,
        decisions,
        deleted: 0,
        dry_run: !config.run_deletes,
    })
}

fn keep_reason(evidence: &EventEvidence, keep_confidence: f32) -> RetentionReason {
    if let Some(probability) = evidence.best_face_probability
        && probability > keep_confidence
    {
        return RetentionReason::ConfidentFace { probability };
    }
    if evidence.speed_violation {
        return RetentionReason::SpeedViolation;
    }
    if let Some(key) = evidence.signals.first() {
        return RetentionReason::NodeSignal { key: key.clone() };
    }
    RetentionReason::NoEvidence
}

pub struct DailyCleanup;

impl DailyCleanup {
    async fn gather(
        ctx: &TaskContext<'_>,
        event: EventRef,
        params: &CleanupParams,
    ) -> Result<EventEvidence, TaskError> {
        let data = ctx.data();
        let mut evidence = EventEvidence::empty(event);

        if let Some(set) = data.result_set(&evidence.event, &ResultKey::from(params.face_key.as_str())).await? {
            evidence.faces_detected = set.face_detections().count();
        }
        if let Some(set) = data
            .result_set(&evidence.event, &ResultKey::from(params.recognition_key.as_str()))
            .await?
        {
            evidence.best_face_probability = set.faces().map(|f| f.probability).reduce(f32::max);
        }
        if let Some(set) = data.result_set(&evidence.event, &ResultKey::from(params.speed_key.as_str())).await? {
            evidence.speed_violation = set.speeds().any(|s| s.violation);
        }
        let signal_keys = ctx
            .retention()
            .node_signals
            .get(&evidence.event.node)
            .cloned()
            .unwrap_or_default();
        for key in signal_keys {
            let present = data
                .result_set(&evidence.event, &ResultKey::new(key.clone()))
                .await?
                .is_some_and(|set| !set.is_empty());
            if present {
                evidence.signals.push(key);
            }
        }
        Ok(evidence)
    }
}

#[async_trait]
impl Executable for DailyCleanup {
    const NAME: &'static str = "DailyCleanup";
    type Params = CleanupParams;

    async fn run(&self, ctx: &mut TaskContext<'_>, params: &CleanupParams) -> Result<TaskOutput, TaskError> {
        let date = ctx.date()?;
        let events = ctx.data().events_on(date).await?;

        let mut evidence = Vec::with_capacity(events.len());
        for event in events {
            evidence.push(Self::gather(ctx, event, params).await?);
        }

        let mut report = evaluate_retention(date, &evidence, ctx.retention())?;
        if ctx.retention().run_deletes {
            for decision in report.decisions.iter().filter(|d| !d.keep) {
                ctx.data().delete_event(&decision.event).await?;
                report.deleted += 1;
            }
        }

        tracing::info!(
            target: RETENTION_TARGET,
            %date,
            events = report.events,
            kept = report.kept(),
            deleted = report.deleted,
            dry_run = report.dry_run,
            "retention sweep finished"
        );
        let value = serde_json::to_value(&report).map_err(|e| TaskError::Execution(e.to_string()))?;
        Ok(TaskOutput::empty().summary(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BoundingBox, FaceDetection, FaceRecord, Identity, JobTarget, Record, SpeedRecord,
        TrackRecord, TrackingResultSet,
    };
    use crate::testing::{TaskHarness, event, task_config};
    use rstest::rstest;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    /// `faces` of `total` events have a face detection.
    fn evidence(total: u32, faces: u32) -> Vec<EventEvidence> {
        (0..total)
            .map(|i| EventEvidence {
                faces_detected: usize::from(i < faces),
                ..EventEvidence::empty(event("gate", "front", i % 24))
            })
            .collect()
    }

    #[rstest]
    #[case::ten_percent(10, 1, true)]
    #[case::just_below(100, 24, true)]
    #[case::at_threshold(4, 1, false)]
    #[case::healthy(10, 6, false)]
    fn failsafe_trips_below_min_face_ratio(#[case] total: u32, #[case] faces: u32, #[case] trips: bool) {
        let result = evaluate_retention(day(), &evidence(total, faces), &RetentionConfig::default());
        assert_eq!(
            matches!(result, Err(TaskError::RetentionFailsafeTripped { .. })),
            trips
        );
    }

    #[test]
    fn empty_day_is_not_a_failsafe() {
        let report = evaluate_retention(day(), &[], &RetentionConfig::default()).unwrap();
        assert_eq!(report.events, 0);
        assert!(report.decisions.is_empty());
    }

    #[rstest]
    #[case::confident_face(Some(0.995), false, vec![], true)]
    #[case::unsure_face(Some(0.98), false, vec![], false)]
    #[case::exactly_at_cutoff(Some(0.99), false, vec![], false)]
    #[case::speeding(None, true, vec![], true)]
    #[case::node_signal(None, false, vec!["obj".to_string()], true)]
    #[case::nothing(None, false, vec![], false)]
    fn keep_rule(
        #[case] best_face_probability: Option<f32>,
        #[case] speed_violation: bool,
        #[case] signals: Vec<String>,
        #[case] keep: bool,
    ) {
        let e = EventEvidence {
            faces_detected: 1,
            best_face_probability,
            speed_violation,
            signals,
            ..EventEvidence::empty(event("gate", "front", 10))
        };
        let report = evaluate_retention(day(), &[e], &RetentionConfig::default()).unwrap();
        assert_eq!(report.decisions[0].keep, keep);
    }

    fn set(ev: &EventRef, key: &str, records: Vec<Record>) -> TrackingResultSet {
        let mut set = TrackingResultSet::new(ResultKey::from(key), ev.clone()).unwrap();
        for r in records {
            set.push(r).unwrap();
        }
        set
    }

    fn face_detection() -> Record {
        Record::FaceDetection(FaceDetection {
            frame: 0,
            bbox: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
            confidence: 0.9,
        })
    }

    /// Three events on one day: a confident face, a speeding car on a node
    /// with a signal key, and one with nothing worth keeping.
    fn seeded(h: &TaskHarness) -> [EventRef; 3] {
        let confident = event("gate", "front", 8);
        let speeding = event("street", "north", 9);
        let empty = event("gate", "front", 10);
        for ev in [&confident, &speeding, &empty] {
            h.data.add_event(ev.clone(), 1, 64, 48);
            h.data.put(set(ev, "fd1", vec![face_detection()]));
        }
        h.data.put(set(
            &confident,
            "fr1",
            vec![Record::Face(FaceRecord {
                frame: 0,
                bbox: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
                identity: Identity::Known("alice".into()),
                probability: 0.995,
                distance: 0.1,
                usable: true,
                curation: None,
                embedding: Vec::new(),
            })],
        ));
        h.data.put(set(
            &speeding,
            "obj",
            vec![Record::Tracking(TrackRecord {
                frame: 0,
                track_id: None,
                class_name: "car".into(),
                confidence: 0.9,
                bbox: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
            })],
        ));
        h.data.put(set(
            &speeding,
            "spd1",
            vec![Record::Speed(SpeedRecord {
                track_id: 1,
                class_name: "car".into(),
                first_frame: 0,
                last_frame: 0,
                speed_kph: 40.0,
                violation: false,
            })],
        ));
        [confident, speeding, empty]
    }

    #[tokio::test]
    async fn dry_run_reports_without_deleting() {
        let mut h = TaskHarness::new();
        h.services.retention.node_signals.insert("street".into(), vec!["obj".into()]);
        let [confident, speeding, empty] = seeded(&h);

        let out = h
            .run(&DailyCleanup, &CleanupParams::default(), task_config(3), JobTarget::Date(day()))
            .await
            .unwrap();

        let report: RetentionReport = serde_json::from_value(out.summary.unwrap()).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.deleted, 0);
        let keep = |ev: &EventRef| report.decisions.iter().find(|d| &d.event == ev).unwrap().keep;
        assert!(keep(&confident));
        assert!(keep(&speeding));
        assert!(!keep(&empty));
        assert!(h.data.contains(&empty));
    }

    #[tokio::test]
    async fn run_deletes_removes_only_unkept_events() {
        let mut h = TaskHarness::new();
        h.services.retention.run_deletes = true;
        h.services.retention.node_signals.insert("street".into(), vec!["obj".into()]);
        let [confident, speeding, empty] = seeded(&h);

        let out = h
            .run(&DailyCleanup, &CleanupParams::default(), task_config(3), JobTarget::Date(day()))
            .await
            .unwrap();

        let report: RetentionReport = serde_json::from_value(out.summary.unwrap()).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(h.data.contains(&confident));
        assert!(h.data.contains(&speeding));
        assert!(!h.data.contains(&empty));
    }

    #[tokio::test]
    async fn failsafe_leaves_data_alone() {
        let mut h = TaskHarness::new();
        h.services.retention.run_deletes = true;
        for hour in 0..10 {
            h.data.add_event(event("gate", "front", hour), 1, 64, 48);
        }
        let ev = event("gate", "front", 0);
        h.data.put(set(&ev, "fd1", vec![face_detection()]));

        let err = h
            .run(&DailyCleanup, &CleanupParams::default(), task_config(3), JobTarget::Date(day()))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::RetentionFailsafeTripped { events: 10, .. }));
        assert_eq!(h.data.event_count(), 10);
    }
}
