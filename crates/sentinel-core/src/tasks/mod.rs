//! Built-in executables.
//!
//! | executable | reads | writes |
//! |------------|-------|--------|
//! | `GetObjects` | frames | `obj` |
//! | `GetFaces` | `trk` / `obj` person tracks | `fd1` |
//! | `FaceRecon` | `fd1` | `fr1` |
//! | `VehicleSpeed` | `trk` vehicle tracks | `spd1` |
//! | `FaceDataUpdate` | `fr1` | identity baselines |
//! | `DailyCleanup` | `fd1`, `fr1`, `spd1`, node signals | deletions |

pub mod cleanup;
pub mod face_recon;
pub mod face_update;
pub mod faces;
pub mod identity;
pub mod objects;
pub mod recognition;
pub mod speed;

pub use self::cleanup::{DailyCleanup, RetentionDecision, RetentionReason, RetentionReport, evaluate_retention};
pub use self::face_recon::FaceRecon;
pub use self::face_update::FaceDataUpdate;
pub use self::faces::GetFaces;
pub use self::identity::{Baseline, Baselines, CentroidClassifier, Classification, Classifier, IdentityStore};
pub use self::objects::GetObjects;
pub use self::recognition::{FaceDecision, RecognitionEnsemble, RecognitionPolicy};
pub use self::speed::VehicleSpeed;

use crate::app::context::TaskContext;
use crate::domain::{TaskError, TrackingResultSet};
use crate::ports::FrameMeta;
use crate::ring::RingCtrl;
use crate::typed::{ExecutableRegistry, RegistryError};

pub fn register_builtins(registry: &mut ExecutableRegistry) -> Result<(), RegistryError> {
    registry.register(GetObjects)?;
    registry.register(GetFaces)?;
    registry.register(FaceRecon)?;
    registry.register(VehicleSpeed)?;
    registry.register(FaceDataUpdate)?;
    registry.register(DailyCleanup)?;
    Ok(())
}

/// Frames for a task that only optionally reads upstream results: under
/// `ringctrl = trk` the input set is loaded and limits the frames.
async fn scoped_frames(
    ctx: &TaskContext<'_>,
) -> Result<(Option<TrackingResultSet>, Vec<FrameMeta>), TaskError> {
    let input = match ctx.task().ringctrl {
        RingCtrl::Trk => Some(ctx.input().await?),
        RingCtrl::Full => None,
    };
    let frames = ctx.frames_to_load(input.as_ref()).await?;
    Ok((input, frames))
}
