//! Event references and job targets.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const START_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A bounded span of activity at one camera view.
///
/// Text form: `node/view/2024-05-01T10:22:03`, optionally suffixed with
/// `#<pipeline event id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventRef {
    pub node: String,
    pub view: String,
    pub start: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_event: Option<u64>,
}

impl EventRef {
    pub fn new(node: impl Into<String>, view: impl Into<String>, start: NaiveDateTime) -> Self {
        Self {
            node: node.into(),
            view: view.into(),
            start,
            pipeline_event: None,
        }
    }

    pub fn with_pipeline_event(mut self, id: u64) -> Self {
        self.pipeline_event = Some(id);
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.node,
            self.view,
            self.start.format(START_FORMAT)
        )?;
        if let Some(id) = self.pipeline_event {
            write!(f, "#{id}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid event reference '{input}': {reason}")]
pub struct ParseEventError {
    input: String,
    reason: &'static str,
}

impl FromStr for EventRef {
    type Err = ParseEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseEventError {
            input: s.to_string(),
            reason,
        };
        let (body, pipeline_event) = match s.split_once('#') {
            Some((body, id)) => (body, Some(id.parse::<u64>().map_err(|_| err("bad pipeline id"))?)),
            None => (s, None),
        };
        let mut parts = body.splitn(3, '/');
        let node = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| err("missing node"))?;
        let view = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| err("missing view"))?;
        let start = parts.next().ok_or_else(|| err("missing start time"))?;
        let start = NaiveDateTime::parse_from_str(start, START_FORMAT)
            .map_err(|_| err("start time must be YYYY-MM-DDTHH:MM:SS"))?;
        Ok(Self {
            node: node.to_string(),
            view: view.to_string(),
            start,
            pipeline_event,
        })
    }
}

/// What a job runs against: one event, or a whole day for maintenance sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum JobTarget {
    Event(EventRef),
    Date(NaiveDate),
}

impl JobTarget {
    pub fn event(&self) -> Option<&EventRef> {
        match self {
            JobTarget::Event(event) => Some(event),
            JobTarget::Date(_) => None,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            JobTarget::Event(event) => event.date(),
            JobTarget::Date(date) => *date,
        }
    }
}

impl fmt::Display for JobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobTarget::Event(event) => event.fmt(f),
            JobTarget::Date(date) => write!(f, "{date}"),
        }
    }
}

impl From<EventRef> for JobTarget {
    fn from(event: EventRef) -> Self {
        JobTarget::Event(event)
    }
}

impl From<NaiveDate> for JobTarget {
    fn from(date: NaiveDate) -> Self {
        JobTarget::Date(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_form() {
        let event: EventRef = "gate/front/2024-05-01T10:22:03#17".parse().unwrap();
        assert_eq!(event.node, "gate");
        assert_eq!(event.view, "front");
        assert_eq!(event.pipeline_event, Some(17));
        assert_eq!(event.to_string(), "gate/front/2024-05-01T10:22:03#17");
    }

    #[test]
    fn rejects_missing_view() {
        assert!("gate//2024-05-01T10:22:03".parse::<EventRef>().is_err());
        assert!("gate".parse::<EventRef>().is_err());
    }

    #[test]
    fn date_target_reports_its_date() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let target = JobTarget::from(date);
        assert_eq!(target.date(), date);
        assert!(target.event().is_none());
    }
}
