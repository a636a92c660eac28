use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::traits::{MediaService, ProgressCallback};
use crate::uploaders::ByteSource;

// 用于序列化 Duration
fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

pub const MIB: u64 = 1024 * 1024;

/// 上传任务唯一标识，注册表的 key，也是所有状态事件的关联 key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 单个上传任务的状态机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum JobState {
    /// 等待 start 事件
    Idle,
    /// 创建媒体对象
    Creating,
    /// 分片上传
    Uploading,
    /// 合并分片
    Finalizing,
    /// 查询服务端处理状态
    Checking,
    /// 等待下一次查询
    Retrying,
    /// 已就绪（终态）
    Ready,
    /// 失败（终态）
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Ready | JobState::Failed)
    }
}

/// 协调器状态：Idle -> Active -> Done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CoordinatorState {
    Idle,
    Active,
    Done,
}

/// 展示给 UI 的任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum UploadStatus {
    /// 已加入，尚未开始
    #[default]
    Pending,
    Uploading,
    Finalizing,
    /// 等待服务端转码
    Transcoding,
    Ready,
    Error,
}

/// 产生状态更新的阶段，仅用于 UI 展示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum StatusOrigin {
    Creating,
    Uploading,
    Finalizing,
    Checking,
    Ready,
    Failed,
}

/// 后端的媒体状态
///
/// Only ready/error/other matter here; every non-terminal status means keep polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    Uploading,
    Moderation,
    Transcoding,
    MezzanineFinalizing,
    Ready,
    Error,
    #[serde(other)]
    Unknown,
}

impl MediaStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, MediaStatus::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MediaStatus::Error)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_ready() || self.is_error()
    }
}

/// 后端创建媒体对象后返回的分片上传目标
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartTarget {
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CreatedMedia {
    pub id: String,
    pub video: MultipartTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PresignedPart {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MediaErrorInfo {
    pub message: Option<String>,
    pub reason: Option<String>,
}

/// `getById` 的返回
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaObject {
    pub id: String,
    pub status: MediaStatus,
    /// 后端可能给 null 或小数
    #[serde(default)]
    pub time_left_in_seconds: Option<f64>,
    #[serde(default)]
    pub error: Option<MediaErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// finalize 需要的分片元数据，parts 按 part_number 升序
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartMeta {
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

/// `create` 的请求参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMediaRequest {
    pub path: String,
    pub company_id: String,
    pub title: String,
    pub content_type: String,
    pub description: Option<String>,
    pub size: u64,
    pub file_name: String,
}

/// 本地待上传的视频
#[derive(Debug, Clone)]
pub struct VideoFile {
    /// 展示用路径（也作为 create 的 path 参数）
    pub path: String,
    pub mime_type: String,
    pub size: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: ByteSource,
}

impl VideoFile {
    pub fn file_name(&self) -> String {
        std::path::Path::new(&self.path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.path)
            .to_string()
    }

    /// 未指定标题时使用去掉扩展名的文件名
    pub fn title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }

        std::path::Path::new(&self.path)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.path)
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct UploadFiles {
    pub video: VideoFile,
}

/// `startUpload` 事件的载荷
#[derive(Clone)]
pub struct StartUploadPayload {
    pub files: UploadFiles,
    pub company_id: String,
    pub media_service: Arc<dyn MediaService>,
    pub progress_callback: Option<ProgressCallback>,
}

/// `startChecking` 事件的载荷，用于页面重载后继续轮询已存在的对象
#[derive(Clone)]
pub struct StartCheckingPayload {
    pub media_service: Arc<dyn MediaService>,
    pub object: MediaObject,
}

/// 从外部发给单个任务的事件
#[derive(Clone)]
pub enum JobCommand {
    StartUpload(StartUploadPayload),
    StartChecking(StartCheckingPayload),
}

impl JobCommand {
    pub fn name(&self) -> &'static str {
        match self {
            JobCommand::StartUpload(_) => "startUpload",
            JobCommand::StartChecking(_) => "startChecking",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub cause: Option<String>,
}

/// 任务发给协调器的状态更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub job_id: JobId,
    pub status: UploadStatus,
    pub origin: StatusOrigin,
    pub media_id: Option<String>,
    pub error_message: Option<String>,
}

/// 注册表中每个任务的最新状态
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: UploadStatus,
    pub origin: Option<StatusOrigin>,
    pub media_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn new(id: JobId, status: UploadStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            status,
            origin: None,
            media_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 合并更新，UI 总是看到最新的一次通知
    pub fn merge(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        self.origin = Some(update.origin);
        if let Some(media_id) = &update.media_id {
            self.media_id = Some(media_id.clone());
        }
        if let Some(error_message) = &update.error_message {
            self.error_message = Some(error_message.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// 推送给 UI 的进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub percentage: f64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: f64,
}

/// 协调器广播的事件
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    StateChanged {
        old_state: CoordinatorState,
        new_state: CoordinatorState,
    },
    JobAdded {
        job_id: JobId,
    },
    StatusChanged(JobSnapshot),
    JobsCleared {
        count: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// 分片大小
    pub part_size: u64,

    /// 同时上传的分片数
    pub max_concurrent_parts: usize,

    /// 每个分片的最大重试次数
    pub max_part_retries: u32,

    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub retry_initial_delay: Duration,

    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub retry_max_delay: Duration,

    /// 单个分片请求超时的下限
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub min_part_timeout: Duration,

    /// 单个分片请求超时的上限
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub max_part_timeout: Duration,

    /// 超过该时间没有进度视为卡住
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub stall_timeout: Duration,

    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub stall_check_interval: Duration,

    /// 服务端未给出剩余时间时的轮询间隔
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub default_poll_delay: Duration,

    /// 进度回调的最小间隔
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub progress_interval: Duration,

    /// 速度变化超过该比例时立即回调
    pub speed_change_threshold: f64,

    /// 平滑速度的采样窗口
    pub speed_window: usize,

    /// 低于该速度（字节/秒）视为不可信
    pub min_speed: f64,

    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub speed_warmup: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: 1000 * MIB,
            max_concurrent_parts: 3,
            max_part_retries: 3,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            min_part_timeout: Duration::from_secs(5 * 60),
            max_part_timeout: Duration::from_secs(180 * 60),
            stall_timeout: Duration::from_secs(60),
            stall_check_interval: Duration::from_secs(10),
            default_poll_delay: Duration::from_secs(30),
            progress_interval: Duration::from_secs(2),
            speed_change_threshold: 0.3,
            speed_window: 5,
            min_speed: 1000.0,
            speed_warmup: Duration::from_secs(2),
        }
    }
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn assert_types() {
        assert_send::<JobCommand>();
        assert_send::<CoordinatorEvent>();
        assert_send::<ProgressSnapshot>();
        assert_send::<StatusUpdate>();
    }
};
