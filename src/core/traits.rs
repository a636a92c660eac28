use std::pin::Pin;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use super::errors::Result;
use super::types::{
    CreateMediaRequest,
    CreatedMedia,
    JobId,
    MediaObject,
    MultipartMeta,
    PresignedPart,
    ProgressSnapshot,
};

/// 后端媒体服务，上传编排只通过这个接口和后端交互
#[async_trait]
pub trait MediaService: Send + Sync {
    /// 创建媒体对象，返回对象 id 和分片上传目标
    async fn create(&self, request: CreateMediaRequest) -> Result<CreatedMedia>;

    /// 获取单个分片的预签名上传地址
    async fn get_presigned_url_for_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<PresignedPart>;

    /// 合并分片
    async fn finalize(&self, media_id: &str, multipart: Option<&MultipartMeta>) -> Result<()>;

    /// 查询媒体对象状态
    async fn get_by_id(&self, media_id: &str) -> Result<MediaObject>;
}

/// 分片请求体
pub type PartBody = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// 单个分片的 PUT 请求
pub struct PartRequest {
    pub url: String,
    pub part_number: u32,
    pub content_type: String,
    pub content_length: u64,
    pub body: PartBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartResponse {
    /// 响应里的 ETag，已去掉引号
    pub etag: Option<String>,
}

/// Sends one part to its presigned URL.
///
/// Timeouts, stall detection and retries are handled by the caller; an
/// implementation only performs a single attempt.
#[async_trait]
pub trait PartTransport: Send + Sync {
    async fn put_part(&self, request: PartRequest) -> Result<PartResponse>;
}

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(&JobId, &ProgressSnapshot) + Send + Sync>;
