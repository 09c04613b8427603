//! InMemoryDataLayer - event store for development and tests.
//!
//! Frames are synthetic: decoding fills the buffer with the frame index so a
//! test can tell which frame landed in which buffer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::domain::{DataError, EventRef, ResultKey, TrackingResultSet};
use crate::ports::{DataLayer, FrameMeta};

#[derive(Debug, Default)]
struct StoredEvent {
    frames: Vec<FrameMeta>,
    results: BTreeMap<ResultKey, TrackingResultSet>,
}

#[derive(Debug, Default)]
pub struct InMemoryDataLayer {
    events: Mutex<BTreeMap<EventRef, StoredEvent>>,
}

impl InMemoryDataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event with `count` frames of `width` x `height`, 100 ms apart.
    pub fn add_event(&self, event: EventRef, count: u32, width: u32, height: u32) {
        let frames = (0..count)
            .map(|index| FrameMeta {
                index,
                width,
                height,
                offset_ms: u64::from(index) * 100,
            })
            .collect();
        self.add_event_frames(event, frames);
    }

    pub fn add_event_frames(&self, event: EventRef, frames: Vec<FrameMeta>) {
        self.events.lock().entry(event).or_default().frames = frames;
    }

    pub fn put(&self, set: TrackingResultSet) {
        let mut events = self.events.lock();
        let stored = events.entry(set.event().clone()).or_default();
        stored.results.insert(set.key().clone(), set);
    }

    pub fn get(&self, event: &EventRef, key: &str) -> Option<TrackingResultSet> {
        self.events
            .lock()
            .get(event)
            .and_then(|e| e.results.get(&ResultKey::from(key)).cloned())
    }

    pub fn contains(&self, event: &EventRef) -> bool {
        self.events.lock().contains_key(event)
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

#[async_trait]
impl DataLayer for InMemoryDataLayer {
    async fn frames(&self, event: &EventRef) -> Result<Vec<FrameMeta>, DataError> {
        self.events
            .lock()
            .get(event)
            .map(|e| e.frames.clone())
            .ok_or_else(|| DataError::NotFound(format!("event {event}")))
    }

    async fn decode_frame(
        &self,
        event: &EventRef,
        frame: &FrameMeta,
        buf: &mut [u8],
    ) -> Result<(), DataError> {
        let events = self.events.lock();
        let stored = events
            .get(event)
            .ok_or_else(|| DataError::NotFound(format!("event {event}")))?;
        if !stored.frames.iter().any(|f| f.index == frame.index) {
            return Err(DataError::NotFound(format!("frame {} of {event}", frame.index)));
        }
        if buf.len() != frame.byte_len() {
            return Err(DataError::Backend(format!(
                "frame {} needs {} bytes, buffer has {}",
                frame.index,
                frame.byte_len(),
                buf.len()
            )));
        }
        buf.fill(frame.index as u8);
        Ok(())
    }

    async fn result_set(
        &self,
        event: &EventRef,
        key: &ResultKey,
    ) -> Result<Option<TrackingResultSet>, DataError> {
        Ok(self
            .events
            .lock()
            .get(event)
            .and_then(|e| e.results.get(key).cloned()))
    }

    async fn write_result_set(&self, set: TrackingResultSet) -> Result<(), DataError> {
        self.put(set);
        Ok(())
    }

    async fn events_on(&self, date: NaiveDate) -> Result<Vec<EventRef>, DataError> {
        Ok(self
            .events
            .lock()
            .keys()
            .filter(|e| e.date() == date)
            .cloned()
            .collect())
    }

    async fn delete_event(&self, event: &EventRef) -> Result<(), DataError> {
        self.events
            .lock()
            .remove(event)
            .map(|_| ())
            .ok_or_else(|| DataError::NotFound(format!("event {event}")))
    }
}
