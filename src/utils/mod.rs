pub mod progress;
pub mod retry;

pub use progress::{
    format_bytes,
    format_duration,
    format_speed,
    EstimatorSettings,
    ThroughputEstimator,
    UploadProgressTracker,
};
pub use retry::{retry_with_config, RetryConfig, RetryStrategy};
