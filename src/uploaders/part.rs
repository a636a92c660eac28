use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use crate::core::{PartRequest, PartTransport, Result, UploadConfig, UploadError, MIB};
use crate::utils::retry::{retry_with_config, RetryConfig};
use super::multipart::PartRange;
use super::progress_stream::{PartProgressFn, ProgressStream};
use super::source::ByteSource;

/// 单个分片的超时：每 MiB 一分钟，限制在 `[min_part_timeout, max_part_timeout]` 内
pub fn part_timeout(size: u64, config: &UploadConfig) -> Duration {
    let size_in_mib = size.div_ceil(MIB);
    Duration::from_secs(60u64.saturating_mul(size_in_mib))
        .max(config.min_part_timeout)
        .min(config.max_part_timeout)
}

/// 分片上传器：单次 PUT 加上超时、卡顿检测和重试
pub struct PartUploader {
    transport: Arc<dyn PartTransport>,
    config: UploadConfig,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl PartUploader {
    pub fn new(transport: Arc<dyn PartTransport>, config: UploadConfig, cancel: CancellationToken) -> Self {
        let retry = RetryConfig::for_parts(&config);
        Self {
            transport,
            config,
            retry,
            cancel,
        }
    }

    /// 上传一个分片并返回它的 ETag
    ///
    /// `on_progress` receives the bytes sent by the current attempt; it is
    /// reset to 0 whenever an attempt starts.
    #[instrument(skip_all, fields(part = part.part_number, bytes = part.len()))]
    pub async fn upload(
        &self,
        url: &str,
        part: &PartRange,
        source: &ByteSource,
        content_type: &str,
        on_progress: PartProgressFn,
    ) -> Result<String> {
        retry_with_config(&self.retry, || {
            self.attempt(url, part, source, content_type, on_progress.clone())
        })
        .await
        .map_err(|source| UploadError::Part {
            part_number: part.part_number,
            source: Box::new(source),
        })
    }

    async fn attempt(
        &self,
        url: &str,
        part: &PartRange,
        source: &ByteSource,
        content_type: &str,
        on_progress: PartProgressFn,
    ) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        on_progress(0);
        let body = source.open_range(part.start..part.end).await?;

        let last_progress = Arc::new(Mutex::new(Instant::now()));
        let progress_clock = last_progress.clone();
        let body = ProgressStream::new(
            body,
            Arc::new(move |sent| {
                *progress_clock.lock() = Instant::now();
                on_progress(sent);
            }),
        );

        let request = PartRequest {
            url: url.to_string(),
            part_number: part.part_number,
            content_type: content_type.to_string(),
            content_length: part.len(),
            body: Box::pin(body),
        };

        let limit = part_timeout(part.len(), &self.config);
        debug!(timeout_secs = limit.as_secs(), "sending part");

        let response = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                return Err(UploadError::Aborted);
            }
            idle = watch_for_stall(&last_progress, self.config.stall_timeout, self.config.stall_check_interval) => {
                warn!(idle_secs = idle.as_secs(), "part upload stalled, aborting request");
                return Err(UploadError::Stalled(idle));
            }
            result = timeout(limit, self.transport.put_part(request)) => match result {
                Ok(response) => response?,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "part upload timed out");
                    return Err(UploadError::Timeout(limit));
                }
            },
        };

        response
            .etag
            .filter(|etag| !etag.is_empty())
            .ok_or(UploadError::MissingETag {
                part_number: part.part_number,
            })
    }
}

/// 每隔 `check_every` 检查一次，距上次进度超过 `stall_timeout` 时返回空闲时长
async fn watch_for_stall(
    last_progress: &Mutex<Instant>,
    stall_timeout: Duration,
    check_every: Duration,
) -> Duration {
    let check_every = check_every.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + check_every, check_every);

    loop {
        ticker.tick().await;
        let idle = last_progress.lock().elapsed();
        if idle >= stall_timeout {
            return idle;
        }
    }
}
