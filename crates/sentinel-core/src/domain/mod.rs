//! Domain model (ids, classes, events, jobs, result sets, errors).

pub mod class;
pub mod errors;
pub mod event;
pub mod ids;
pub mod job;
pub mod results;

pub use class::PriorityClass;
pub use errors::{
    AcceleratorInitError, AcceleratorRuntimeError, BufferExhausted, ConfigError, DataError,
    DispatchError, EngineError, InferenceError, SentinelError, TaskError,
};
pub use event::{EventRef, JobTarget};
pub use ids::JobId;
pub use job::{Job, JobCounts, JobRecord, JobSource, JobState};
pub use results::{
    BoundingBox, Curation, FaceDetection, FaceRecord, Identity, Record, RecordSchema, ResultKey,
    SchemaError, SpeedRecord, TrackRecord, TrackingResultSet,
};
