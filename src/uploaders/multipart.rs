use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use crate::core::{
    CompletedPart,
    ConcurrencyLimiter,
    JobId,
    MediaService,
    MultipartMeta,
    MultipartTarget,
    PartTransport,
    ProgressCallback,
    Result,
    UploadConfig,
    UploadError,
    VideoFile,
};
use crate::utils::progress::{EstimatorSettings, UploadProgressTracker};
use super::part::PartUploader;
use super::progress_stream::PartProgressFn;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 文件中的一个分片，`[start, end)`，编号从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub part_number: u32,
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// 在进度数组中的下标
    pub fn index(&self) -> usize {
        (self.part_number - 1) as usize
    }
}

/// 按固定大小切分，最后一片可能更小
pub fn split_parts(total_size: u64, part_size: u64) -> Vec<PartRange> {
    let part_size = part_size.max(1);
    let count = total_size.div_ceil(part_size);

    (0..count)
        .map(|i| PartRange {
            part_number: (i + 1) as u32,
            start: i * part_size,
            end: ((i + 1) * part_size).min(total_size),
        })
        .collect()
}

/// 上传阶段：切分文件，限流并发上传所有分片，按编号排序后返回分片清单
pub struct MultipartUpload {
    pub job_id: JobId,
    pub media_service: Arc<dyn MediaService>,
    pub transport: Arc<dyn PartTransport>,
    pub target: MultipartTarget,
    pub file: VideoFile,
    pub config: UploadConfig,
    pub progress_callback: Option<ProgressCallback>,
    pub cancel: CancellationToken,
}

impl MultipartUpload {
    #[instrument(skip_all, fields(job_id = %self.job_id, size = self.file.size))]
    pub async fn run(self) -> Result<MultipartMeta> {
        let size = self.file.size;
        if size == 0 {
            return Err(UploadError::InvalidFile(format!("{} is empty", self.file.path)));
        }

        let available = self.file.source.len().await?;
        if available < size {
            return Err(UploadError::InvalidFile(format!(
                "{} has {} bytes, expected {}",
                self.file.path, available, size
            )));
        }

        let parts = split_parts(size, self.config.part_size);
        info!(
            parts = parts.len(),
            part_size = self.config.part_size,
            "starting multipart upload"
        );

        let tracker = Arc::new(UploadProgressTracker::new(
            self.job_id.clone(),
            parts.len(),
            size,
            EstimatorSettings::from(&self.config),
            self.progress_callback.clone(),
        ));
        let uploader = PartUploader::new(self.transport.clone(), self.config.clone(), self.cancel.clone());
        let limiter = ConcurrencyLimiter::new(self.config.max_concurrent_parts);

        let content_type = if self.file.mime_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            self.file.mime_type.as_str()
        };

        let service = &self.media_service;
        let target = &self.target;
        let source = &self.file.source;
        let uploader = &uploader;

        let tasks = parts.iter().map(|part| {
            let tracker = tracker.clone();
            async move {
                let presigned = service
                    .get_presigned_url_for_part(&target.key, &target.upload_id, part.part_number)
                    .await
                    .map_err(|err| UploadError::Part {
                        part_number: part.part_number,
                        source: Box::new(err),
                    })?;

                let index = part.index();
                let on_progress: PartProgressFn = Arc::new(move |bytes| tracker.update_part(index, bytes));
                let etag = uploader
                    .upload(&presigned.url, part, source, content_type, on_progress)
                    .await?;

                debug!(part = part.part_number, etag = %etag, "part uploaded");
                Ok(CompletedPart {
                    part_number: part.part_number,
                    etag,
                })
            }
        });

        let mut completed = limiter.run_all(tasks).await?;
        completed.sort_by_key(|part| part.part_number);
        tracker.finish();

        info!(parts = completed.len(), "all parts uploaded");
        Ok(MultipartMeta {
            key: self.target.key.clone(),
            upload_id: self.target.upload_id.clone(),
            parts: completed,
        })
    }
}
