//! DataLayer port - event storage owned by the capture side.
//!
//! The engine never owns event data: it reads frames and upstream result
//! sets through this trait, and hands produced result sets back to it. Once
//! `write_result_set` returns, the set belongs to the data layer.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{DataError, EventRef, ResultKey, TrackingResultSet};

/// Where one decoded frame sits inside an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    /// Milliseconds since the event start.
    pub offset_ms: u64,
}

impl FrameMeta {
    /// Size of the decoded RGB24 image.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[async_trait]
pub trait DataLayer: Send + Sync {
    /// Frames of an event, in capture order.
    async fn frames(&self, event: &EventRef) -> Result<Vec<FrameMeta>, DataError>;

    /// Decode one frame as RGB24 into `buf` (exactly `frame.byte_len()` bytes).
    async fn decode_frame(
        &self,
        event: &EventRef,
        frame: &FrameMeta,
        buf: &mut [u8],
    ) -> Result<(), DataError>;

    async fn result_set(
        &self,
        event: &EventRef,
        key: &ResultKey,
    ) -> Result<Option<TrackingResultSet>, DataError>;

    async fn write_result_set(&self, set: TrackingResultSet) -> Result<(), DataError>;

    /// Events that started on `date`.
    async fn events_on(&self, date: NaiveDate) -> Result<Vec<EventRef>, DataError>;

    async fn delete_event(&self, event: &EventRef) -> Result<(), DataError>;
}
