pub mod client;
pub mod config;
pub mod core;
pub mod uploaders;
pub mod utils;

// 重新导出常用类型
pub use client::HttpMediaService;
pub use crate::core::{
    CoordinatorEvent,
    CoordinatorHandle,
    CoordinatorState,
    JobCommand,
    JobId,
    JobSnapshot,
    MediaService,
    PartTransport,
    ProgressSnapshot,
    Result,
    StartCheckingPayload,
    StartUploadPayload,
    UploadConfig,
    UploadCoordinator,
    UploadError,
    UploadStatus,
    VideoFile,
};
pub use uploaders::{ByteSource, HttpPartTransport};
