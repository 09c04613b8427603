//! IdGenerator port.
//!
//! # Implementations
//! - **UlidGenerator**: ULID from the injected clock plus 80 random bits

use crate::domain::ids::JobId;
use crate::ports::Clock;
use ulid::Ulid;

/// Generates job ids. `Send + Sync` because the dispatcher is shared by the
/// control channel and every engine thread.
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// ULID-based generator.
///
/// The timestamp half comes from the `Clock`, so a `FixedClock` pins it while
/// the random half keeps ids unique.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        JobId::from(ulid)
    }
}
