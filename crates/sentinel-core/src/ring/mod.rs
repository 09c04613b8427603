//! Size-classed frame buffers.
//!
//! A ring-buffer model names a set of frame sizes, each with a fixed depth.
//! Engines pre-allocate every buffer of their model at startup, so decoded
//! frame memory is bounded by `sum(width * height * 3 * depth)` per engine
//! no matter how many frames an event holds.

mod pool;

use serde::{Deserialize, Serialize};

pub use self::pool::{BufferHandle, LoadedFrame, RingBufferPool, RingError};
use crate::config::RingBufferConfig;
use crate::ports::FrameMeta;

/// One frame size and how many buffers of it exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeClass {
    pub width: u32,
    pub height: u32,
    pub depth: usize,
}

impl SizeClass {
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes per RGB24 buffer.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn fits(&self, width: u32, height: u32) -> bool {
        width <= self.width && height <= self.height
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBufferModel {
    name: String,
    /// Ascending by area.
    sizes: Vec<SizeClass>,
}

impl RingBufferModel {
    pub fn new(name: impl Into<String>, mut sizes: Vec<SizeClass>) -> Self {
        sizes.sort_by_key(|s| s.byte_len());
        Self {
            name: name.into(),
            sizes,
        }
    }

    pub fn from_config(name: &str, config: &RingBufferConfig) -> Self {
        let sizes = config
            .sizes
            .iter()
            .map(|s| SizeClass {
                width: s.width,
                height: s.height,
                depth: s.depth,
            })
            .collect();
        Self::new(name, sizes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sizes(&self) -> &[SizeClass] {
        &self.sizes
    }

    /// Smallest size class that holds a `width` x `height` frame.
    pub fn size_class_for(&self, width: u32, height: u32) -> Option<SizeClass> {
        self.sizes.iter().copied().find(|s| s.fits(width, height))
    }
}

/// How much of an event a task loads into ring buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingCtrl {
    /// Every frame of the event.
    #[default]
    Full,
    /// Only frames referenced by the input result set.
    Trk,
}

/// Borrowed decoded frame, as handed to an accelerator.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub meta: FrameMeta,
    /// RGB24, row-major, `meta.byte_len()` bytes.
    pub pixels: &'a [u8],
}
