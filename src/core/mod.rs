mod coordinator;
mod errors;
mod job;
mod limiter;
mod traits;
mod types;

pub use coordinator::{CoordinatorHandle, StatusReporter, UploadCoordinator};
pub use errors::{describe_error, Result, UploadError};
pub use job::{JobAction, JobContext, JobEvent, JobHandle, JobMachine, UploadJob};
pub use limiter::ConcurrencyLimiter;
pub use traits::{
    MediaService,
    PartBody,
    PartRequest,
    PartResponse,
    PartTransport,
    ProgressCallback,
};
pub use types::{
    CompletedPart,
    CoordinatorEvent,
    CoordinatorState,
    CreateMediaRequest,
    CreatedMedia,
    ErrorInfo,
    JobCommand,
    JobId,
    JobSnapshot,
    JobState,
    MediaErrorInfo,
    MediaObject,
    MediaStatus,
    MultipartMeta,
    MultipartTarget,
    PresignedPart,
    ProgressSnapshot,
    StartCheckingPayload,
    StartUploadPayload,
    StatusOrigin,
    StatusUpdate,
    UploadConfig,
    UploadFiles,
    UploadStatus,
    VideoFile,
    MIB,
};
