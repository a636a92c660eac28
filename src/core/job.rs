use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::uploaders::MultipartUpload;
use super::coordinator::StatusReporter;
use super::errors::{describe_error, Result, UploadError};
use super::traits::{MediaService, PartTransport, ProgressCallback};
use super::types::{
    CreateMediaRequest,
    CreatedMedia,
    ErrorInfo,
    JobCommand,
    JobId,
    JobState,
    MediaObject,
    MultipartMeta,
    MultipartTarget,
    StartCheckingPayload,
    StartUploadPayload,
    StatusOrigin,
    StatusUpdate,
    UploadConfig,
    UploadStatus,
    VideoFile,
};

const PROCESSING_FAILED: &str = "Media processing failed";

/// 状态机的输入：外部命令，或者上一个动作的结果
pub enum JobEvent {
    Command(JobCommand),
    Created(Result<CreatedMedia>),
    Uploaded(Result<MultipartMeta>),
    Finalized(Result<()>),
    Checked(Result<MediaObject>),
    PollDelayElapsed,
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Command(command) => command.name(),
            JobEvent::Created(_) => "created",
            JobEvent::Uploaded(_) => "uploaded",
            JobEvent::Finalized(_) => "finalized",
            JobEvent::Checked(_) => "checked",
            JobEvent::PollDelayElapsed => "pollDelayElapsed",
        }
    }
}

/// 进入新状态后需要执行的副作用，由 runner 执行并把结果作为事件送回
pub enum JobAction {
    Create {
        service: Arc<dyn MediaService>,
        request: CreateMediaRequest,
    },
    Upload {
        service: Arc<dyn MediaService>,
        target: MultipartTarget,
        file: VideoFile,
        progress_callback: Option<ProgressCallback>,
    },
    Finalize {
        service: Arc<dyn MediaService>,
        media_id: String,
        meta: Option<MultipartMeta>,
    },
    Check {
        service: Arc<dyn MediaService>,
        media_id: String,
    },
    Wait(Duration),
}

/// 单个文件的状态机
///
/// `handle` is a pure transition function: it never performs I/O, it only
/// returns the next action and queues status notifications for the
/// coordinator. Ready and Failed accept no further events.
pub struct JobMachine {
    id: JobId,
    state: JobState,
    media_object_id: Option<String>,
    multipart_target: Option<MultipartTarget>,
    multipart_meta: Option<MultipartMeta>,
    error_info: Option<ErrorInfo>,
    poll_delay: Option<Duration>,
    default_poll_delay: Duration,
    media_service: Option<Arc<dyn MediaService>>,
    video: Option<VideoFile>,
    progress_callback: Option<ProgressCallback>,
    outbox: Vec<StatusUpdate>,
}

impl JobMachine {
    pub fn new(id: JobId, default_poll_delay: Duration) -> Self {
        Self {
            id,
            state: JobState::Idle,
            media_object_id: None,
            multipart_target: None,
            multipart_meta: None,
            error_info: None,
            poll_delay: None,
            default_poll_delay,
            media_service: None,
            video: None,
            progress_callback: None,
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn media_object_id(&self) -> Option<&str> {
        self.media_object_id.as_deref()
    }

    pub fn multipart_target(&self) -> Option<&MultipartTarget> {
        self.multipart_target.as_ref()
    }

    pub fn multipart_meta(&self) -> Option<&MultipartMeta> {
        self.multipart_meta.as_ref()
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        self.error_info.as_ref()
    }

    pub fn poll_delay(&self) -> Option<Duration> {
        self.poll_delay
    }

    /// 取出待发送给协调器的状态更新
    pub fn take_notifications(&mut self) -> Vec<StatusUpdate> {
        std::mem::take(&mut self.outbox)
    }

    pub fn handle(&mut self, event: JobEvent) -> Option<JobAction> {
        if self.state.is_terminal() {
            debug!(job_id = %self.id, state = ?self.state, event = event.name(), "job finished, event ignored");
            return None;
        }

        match (self.state, event) {
            (JobState::Idle, JobEvent::Command(JobCommand::StartUpload(payload))) => self.start_upload(payload),
            (JobState::Idle, JobEvent::Command(JobCommand::StartChecking(payload))) => self.start_checking(payload),
            (JobState::Creating, JobEvent::Created(result)) => self.on_created(result),
            (JobState::Uploading, JobEvent::Uploaded(result)) => self.on_uploaded(result),
            (JobState::Finalizing, JobEvent::Finalized(result)) => self.on_finalized(result),
            (JobState::Checking, JobEvent::Checked(result)) => self.on_checked(result),
            (JobState::Retrying, JobEvent::PollDelayElapsed) => {
                self.transition(JobState::Checking);
                self.check_action()
            }
            (state, event) => {
                warn!(job_id = %self.id, ?state, event = event.name(), "event not valid in current state, ignored");
                None
            }
        }
    }

    fn start_upload(&mut self, payload: StartUploadPayload) -> Option<JobAction> {
        let video = payload.files.video;
        let request = CreateMediaRequest {
            path: video.path.clone(),
            company_id: payload.company_id,
            title: video.title(),
            content_type: video.mime_type.clone(),
            description: video.description.clone(),
            size: video.size,
            file_name: video.file_name(),
        };

        self.media_service = Some(payload.media_service.clone());
        self.video = Some(video);
        self.progress_callback = payload.progress_callback;
        self.transition(JobState::Creating);

        Some(JobAction::Create {
            service: payload.media_service,
            request,
        })
    }

    fn start_checking(&mut self, payload: StartCheckingPayload) -> Option<JobAction> {
        self.media_service = Some(payload.media_service);
        self.media_object_id = Some(payload.object.id);
        self.transition(JobState::Checking);
        self.check_action()
    }

    fn on_created(&mut self, result: Result<CreatedMedia>) -> Option<JobAction> {
        let created = match result {
            Ok(created) => created,
            Err(err) => return self.fail(&err, "Failed to create media"),
        };

        let (Some(service), Some(video)) = (self.media_service.clone(), self.video.clone()) else {
            return self.fail(&UploadError::internal_error("upload payload missing"), "Failed to create media");
        };

        info!(job_id = %self.id, media_id = %created.id, "media object created");
        self.media_object_id = Some(created.id);
        self.multipart_target = Some(created.video.clone());
        self.transition(JobState::Uploading);
        self.notify(UploadStatus::Uploading, StatusOrigin::Creating, None);

        Some(JobAction::Upload {
            service,
            target: created.video,
            file: video,
            progress_callback: self.progress_callback.clone(),
        })
    }

    fn on_uploaded(&mut self, result: Result<MultipartMeta>) -> Option<JobAction> {
        let meta = match result {
            Ok(meta) => meta,
            Err(err) => return self.fail(&err, "Failed to upload media"),
        };

        let (Some(service), Some(media_id)) = (self.media_service.clone(), self.media_object_id.clone()) else {
            return self.fail(&UploadError::internal_error("media object missing"), "Failed to upload media");
        };

        self.multipart_meta = Some(meta.clone());
        self.transition(JobState::Finalizing);
        self.notify(UploadStatus::Finalizing, StatusOrigin::Uploading, None);

        Some(JobAction::Finalize {
            service,
            media_id,
            meta: Some(meta),
        })
    }

    fn on_finalized(&mut self, result: Result<()>) -> Option<JobAction> {
        if let Err(err) = result {
            return self.fail(&err, "Failed to finalize upload");
        }

        self.transition(JobState::Checking);
        self.notify(UploadStatus::Transcoding, StatusOrigin::Finalizing, None);
        self.check_action()
    }

    fn on_checked(&mut self, result: Result<MediaObject>) -> Option<JobAction> {
        let object = match result {
            Ok(object) => object,
            Err(err) => return self.fail(&err, "Failed to check media status"),
        };

        if object.status.is_ready() {
            info!(job_id = %self.id, media_id = %object.id, "media ready");
            self.transition(JobState::Ready);
            self.notify(UploadStatus::Ready, StatusOrigin::Ready, None);
            return None;
        }

        if object.status.is_error() {
            let message = object
                .error
                .as_ref()
                .and_then(|error| {
                    error.reason.as_deref()
                        .filter(|reason| !reason.is_empty())
                        .or(error.message.as_deref().filter(|message| !message.is_empty()))
                })
                .unwrap_or(PROCESSING_FAILED)
                .to_string();
            return self.fail_with(message, None);
        }

        let delay = object
            .time_left_in_seconds
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(self.default_poll_delay);

        debug!(job_id = %self.id, status = ?object.status, delay_ms = delay.as_millis() as u64, "media still processing");
        self.poll_delay = Some(delay);
        self.transition(JobState::Retrying);
        self.notify(UploadStatus::Transcoding, StatusOrigin::Checking, None);
        Some(JobAction::Wait(delay))
    }

    fn check_action(&mut self) -> Option<JobAction> {
        match (self.media_service.clone(), self.media_object_id.clone()) {
            (Some(service), Some(media_id)) => Some(JobAction::Check { service, media_id }),
            _ => self.fail(&UploadError::internal_error("media object missing"), "Failed to check media status"),
        }
    }

    fn fail(&mut self, err: &UploadError, fallback: &str) -> Option<JobAction> {
        let cause = err.source().map(|source| source.to_string());
        self.fail_with(describe_error(err, fallback), cause)
    }

    fn fail_with(&mut self, message: String, cause: Option<String>) -> Option<JobAction> {
        error!(job_id = %self.id, state = ?self.state, error = %message, "job failed");
        self.transition(JobState::Failed);
        self.notify(UploadStatus::Error, StatusOrigin::Failed, Some(message.clone()));
        self.error_info = Some(ErrorInfo { message, cause });
        None
    }

    fn transition(&mut self, next: JobState) {
        debug!(job_id = %self.id, from = ?self.state, to = ?next, "job transition");
        self.state = next;
    }

    fn notify(&mut self, status: UploadStatus, origin: StatusOrigin, error_message: Option<String>) {
        self.outbox.push(StatusUpdate {
            job_id: self.id.clone(),
            status,
            origin,
            media_id: self.media_object_id.clone(),
            error_message,
        });
    }
}

/// 运行任务需要的外部依赖
pub struct JobContext {
    pub config: UploadConfig,
    pub transport: Arc<dyn PartTransport>,
    pub reporter: StatusReporter,
    pub cancel: CancellationToken,
}

/// 协调器持有的任务句柄
pub struct JobHandle {
    inbox: mpsc::UnboundedSender<JobCommand>,
    cancel: CancellationToken,
    join_handle: JoinHandle<JobState>,
}

impl JobHandle {
    /// 投递命令，任务已结束时返回 false
    pub fn send(&self, command: JobCommand) -> bool {
        self.inbox.send(command).is_ok()
    }

    /// 取消任务并中止其中的网络请求
    pub fn abort(&self) {
        self.cancel.cancel();
        self.join_handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// 等待任务退出，返回最终状态；被中止时返回 None
    pub async fn join(self) -> Option<JobState> {
        drop(self.inbox);
        self.join_handle.await.ok()
    }
}

/// 每个文件一个 actor：从收件箱读命令，驱动 `JobMachine` 并执行它返回的动作
pub struct UploadJob {
    machine: JobMachine,
    ctx: JobContext,
}

impl UploadJob {
    pub fn spawn(id: JobId, ctx: JobContext) -> JobHandle {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let cancel = ctx.cancel.clone();
        let job = Self {
            machine: JobMachine::new(id, ctx.config.default_poll_delay),
            ctx,
        };

        JobHandle {
            inbox: inbox_tx,
            cancel,
            join_handle: tokio::spawn(job.run(inbox_rx)),
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<JobCommand>) -> JobState {
        let mut in_flight: Option<BoxFuture<'static, JobEvent>> = None;
        let mut inbox_open = true;

        loop {
            if self.machine.state().is_terminal() || (!inbox_open && in_flight.is_none()) {
                break;
            }

            let (event, from_action) = tokio::select! {
                biased;

                _ = self.ctx.cancel.cancelled() => {
                    info!(job_id = %self.machine.id(), state = ?self.machine.state(), "job cancelled");
                    break;
                }
                event = next_outcome(&mut in_flight) => (event, true),
                command = inbox.recv(), if inbox_open => match command {
                    Some(command) => (JobEvent::Command(command), false),
                    None => {
                        inbox_open = false;
                        continue;
                    }
                },
            };

            if from_action {
                in_flight = None;
            }

            let action = self.machine.handle(event);
            for update in self.machine.take_notifications() {
                self.ctx.reporter.report(update);
            }

            if let Some(action) = action {
                in_flight = Some(self.perform(action));
            }
        }

        self.machine.state()
    }

    fn perform(&self, action: JobAction) -> BoxFuture<'static, JobEvent> {
        match action {
            JobAction::Create { service, request } => {
                async move { JobEvent::Created(service.create(request).await) }.boxed()
            }
            JobAction::Upload { service, target, file, progress_callback } => {
                let upload = MultipartUpload {
                    job_id: self.machine.id().clone(),
                    media_service: service,
                    transport: self.ctx.transport.clone(),
                    target,
                    file,
                    config: self.ctx.config.clone(),
                    progress_callback,
                    cancel: self.ctx.cancel.child_token(),
                };
                async move { JobEvent::Uploaded(upload.run().await) }.boxed()
            }
            JobAction::Finalize { service, media_id, meta } => {
                async move { JobEvent::Finalized(service.finalize(&media_id, meta.as_ref()).await) }.boxed()
            }
            JobAction::Check { service, media_id } => {
                async move { JobEvent::Checked(service.get_by_id(&media_id).await) }.boxed()
            }
            JobAction::Wait(delay) => {
                async move {
                    tokio::time::sleep(delay).await;
                    JobEvent::PollDelayElapsed
                }
                .boxed()
            }
        }
    }
}

async fn next_outcome(in_flight: &mut Option<BoxFuture<'static, JobEvent>>) -> JobEvent {
    match in_flight {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
