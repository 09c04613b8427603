//! RingBufferPool - pre-allocated buffers per size class.
//!
//! Each size class pairs a semaphore of `depth` permits with a free list of
//! buffers. A handle owns one permit and one buffer; dropping it puts the
//! buffer back before the permit is released, so a successful acquire always
//! finds a buffer on the free list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{FrameView, RingBufferModel, SizeClass};
use crate::domain::{BufferExhausted, TaskError};
use crate::ports::FrameMeta;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RingError {
    #[error(transparent)]
    Exhausted(#[from] BufferExhausted),

    #[error("no ring-buffer model '{0}' in this pool")]
    UnknownModel(String),

    #[error("ring-buffer model '{model}' has no size class for {width}x{height}")]
    NoSizeClass {
        model: String,
        width: u32,
        height: u32,
    },
}

impl From<RingError> for TaskError {
    fn from(err: RingError) -> Self {
        match err {
            RingError::Exhausted(e) => TaskError::Buffer(e),
            other => TaskError::Execution(other.to_string()),
        }
    }
}

type FreeList = Arc<Mutex<Vec<Box<[u8]>>>>;

struct ClassSlots {
    size: SizeClass,
    permits: Arc<Semaphore>,
    free: FreeList,
}

struct ModelSlots {
    model: RingBufferModel,
    classes: Vec<ClassSlots>,
}

pub struct RingBufferPool {
    models: HashMap<String, ModelSlots>,
    timeout: Duration,
}

impl RingBufferPool {
    /// Allocate every buffer of every model up front.
    pub fn new(models: impl IntoIterator<Item = RingBufferModel>, timeout: Duration) -> Self {
        let models = models
            .into_iter()
            .map(|model| {
                let classes = model
                    .sizes()
                    .iter()
                    .map(|&size| {
                        let buffers = (0..size.depth)
                            .map(|_| vec![0u8; size.byte_len()].into_boxed_slice())
                            .collect();
                        ClassSlots {
                            size,
                            permits: Arc::new(Semaphore::new(size.depth)),
                            free: Arc::new(Mutex::new(buffers)),
                        }
                    })
                    .collect();
                (model.name().to_string(), ModelSlots { model, classes })
            })
            .collect();
        Self { models, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn size_class_for(&self, model: &str, width: u32, height: u32) -> Result<(u32, u32), RingError> {
        let slots = self.model(model)?;
        slots
            .model
            .size_class_for(width, height)
            .map(|s| s.dims())
            .ok_or_else(|| RingError::NoSizeClass {
                model: model.to_string(),
                width,
                height,
            })
    }

    /// Take a buffer of `size_class`, waiting up to the pool timeout for one to
    /// come back.
    pub async fn acquire(&self, model: &str, size_class: (u32, u32)) -> Result<BufferHandle, RingError> {
        let class = self.class(model, size_class)?;
        let exhausted = || BufferExhausted {
            model: model.to_string(),
            size_class,
            waited: self.timeout,
        };

        let permit = match tokio::time::timeout(self.timeout, class.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed; treat it like a timeout anyway.
            Ok(Err(_)) | Err(_) => return Err(exhausted().into()),
        };
        let buf = class.free.lock().pop().ok_or_else(exhausted)?;

        Ok(BufferHandle {
            buf: Some(buf),
            len: 0,
            size_class,
            free: class.free.clone(),
            _permit: permit,
        })
    }

    /// Acquire a buffer sized for `frame`.
    pub async fn acquire_for(&self, model: &str, frame: &FrameMeta) -> Result<BufferHandle, RingError> {
        let size_class = self.size_class_for(model, frame.width, frame.height)?;
        self.acquire(model, size_class).await
    }

    /// Outstanding handles for one size class.
    pub fn in_use(&self, model: &str, size_class: (u32, u32)) -> usize {
        self.class(model, size_class)
            .map(|c| c.size.depth - c.permits.available_permits())
            .unwrap_or(0)
    }

    fn model(&self, model: &str) -> Result<&ModelSlots, RingError> {
        self.models
            .get(model)
            .ok_or_else(|| RingError::UnknownModel(model.to_string()))
    }

    fn class(&self, model: &str, size_class: (u32, u32)) -> Result<&ClassSlots, RingError> {
        self.model(model)?
            .classes
            .iter()
            .find(|c| c.size.dims() == size_class)
            .ok_or(RingError::NoSizeClass {
                model: model.to_string(),
                width: size_class.0,
                height: size_class.1,
            })
    }
}

/// Exclusive use of one pre-allocated frame buffer. Released on drop.
pub struct BufferHandle {
    buf: Option<Box<[u8]>>,
    len: usize,
    size_class: (u32, u32),
    free: FreeList,
    // Dropped after `Drop::drop` has returned the buffer.
    _permit: OwnedSemaphorePermit,
}

impl BufferHandle {
    pub fn size_class(&self) -> (u32, u32) {
        self.size_class
    }

    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    /// Writable region for a frame of `frame.byte_len()` bytes.
    pub fn prepare(&mut self, frame: &FrameMeta) -> &mut [u8] {
        let len = frame.byte_len().min(self.capacity());
        self.len = len;
        match self.buf.as_mut() {
            Some(buf) => &mut buf[..len],
            None => &mut [],
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.buf.as_ref() {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.free.lock().push(buf);
        }
    }
}

/// A decoded frame sitting in a ring buffer.
pub struct LoadedFrame {
    pub meta: FrameMeta,
    pub handle: BufferHandle,
}

impl LoadedFrame {
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            meta: self.meta,
            pixels: self.handle.as_slice(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(depth: usize, timeout_ms: u64) -> RingBufferPool {
        let model = RingBufferModel::new(
            "small",
            vec![
                SizeClass { width: 4, height: 4, depth },
                SizeClass { width: 8, height: 8, depth: 1 },
            ],
        );
        RingBufferPool::new([model], Duration::from_millis(timeout_ms))
    }

    fn frame(width: u32, height: u32) -> FrameMeta {
        FrameMeta {
            index: 0,
            width,
            height,
            offset_ms: 0,
        }
    }

    #[tokio::test]
    async fn handles_never_exceed_depth() {
        let pool = pool(2, 20);
        let a = pool.acquire("small", (4, 4)).await.unwrap();
        let b = pool.acquire("small", (4, 4)).await.unwrap();
        assert_eq!(pool.in_use("small", (4, 4)), 2);

        let err = pool.acquire("small", (4, 4)).await.err().unwrap();
        assert!(matches!(err, RingError::Exhausted(BufferExhausted { size_class: (4, 4), .. })));

        drop(a);
        assert_eq!(pool.in_use("small", (4, 4)), 1);
        let _c = pool.acquire("small", (4, 4)).await.unwrap();
        assert_eq!(pool.in_use("small", (4, 4)), 2);
        drop(b);
    }

    #[tokio::test]
    async fn waiting_acquire_gets_released_buffer() {
        let pool = Arc::new(pool(1, 1_000));
        let held = pool.acquire("small", (4, 4)).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("small", (4, 4)).await.map(|h| h.size_class()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), (4, 4));
    }

    #[tokio::test]
    async fn handles_do_not_alias() {
        let pool = pool(2, 20);
        let mut a = pool.acquire("small", (4, 4)).await.unwrap();
        let mut b = pool.acquire("small", (4, 4)).await.unwrap();
        a.prepare(&frame(4, 4)).fill(1);
        b.prepare(&frame(4, 4)).fill(2);
        assert!(a.as_slice().iter().all(|&p| p == 1));
        assert!(b.as_slice().iter().all(|&p| p == 2));
    }

    #[tokio::test]
    async fn acquire_for_picks_size_class() {
        let pool = pool(1, 20);
        let mut handle = pool.acquire_for("small", &frame(6, 5)).await.unwrap();
        assert_eq!(handle.size_class(), (8, 8));
        assert_eq!(handle.prepare(&frame(6, 5)).len(), 6 * 5 * 3);
    }

    #[tokio::test]
    async fn unknown_model_and_oversized_frames_fail() {
        let pool = pool(1, 20);
        assert!(matches!(
            pool.acquire("hd", (4, 4)).await.err().unwrap(),
            RingError::UnknownModel(_)
        ));
        assert!(matches!(
            pool.size_class_for("small", 16, 16).unwrap_err(),
            RingError::NoSizeClass { width: 16, .. }
        ));
    }

    #[test]
    fn exhaustion_maps_to_buffer_task_error() {
        let err: TaskError = RingError::Exhausted(BufferExhausted {
            model: "small".into(),
            size_class: (4, 4),
            waited: Duration::from_millis(5),
        })
        .into();
        assert!(matches!(err, TaskError::Buffer(_)));
    }
}
