//! Strongly-typed identifiers.
//!
//! Ids are ULIDs wrapped in a phantom-typed `Id<T>`, so a `JobId` cannot be
//! confused with an id of another kind at compile time while sharing one
//! implementation. ULIDs sort by creation time, which keeps ledger listings
//! in submission order without a separate counter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait supplying the display prefix of an id kind.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Job marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Identifier of a Job (one task run against one target).
pub type JobId = Id<Job>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix_but_json_is_bare() {
        let ulid = Ulid::from_parts(1_714_557_600_000, 7);
        let job = JobId::from_ulid(ulid);
        assert_eq!(job.to_string(), format!("job-{ulid}"));
        assert_eq!(serde_json::to_value(job).unwrap(), ulid.to_string());
    }

    #[test]
    fn order_follows_timestamp() {
        let earlier = JobId::from(Ulid::from_parts(1_000, u128::MAX >> 48));
        let later = JobId::from(Ulid::from_parts(1_001, 0));
        assert!(earlier < later);
    }

    #[test]
    fn bare_ulid_parses_back() {
        let job_id = JobId::from_ulid(Ulid::new());
        let text = serde_json::to_string(&job_id).unwrap();
        assert_eq!(serde_json::from_str::<JobId>(&text).unwrap(), job_id);
    }

    #[test]
    fn marker_adds_no_size() {
        assert_eq!(std::mem::size_of::<JobId>(), std::mem::size_of::<Ulid>());
    }
}
