use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::uploaders::HttpPartTransport;
use super::errors::{Result, UploadError};
use super::job::{JobContext, JobHandle, UploadJob};
use super::traits::PartTransport;
use super::types::{
    CoordinatorEvent,
    CoordinatorState,
    JobCommand,
    JobId,
    JobSnapshot,
    StatusUpdate,
    UploadConfig,
    UploadStatus,
};

/// 任务上报的状态，带着任务实例编号
#[derive(Debug)]
pub(crate) struct ReportedStatus {
    pub(crate) instance: u64,
    pub(crate) update: StatusUpdate,
}

/// 任务向协调器上报状态的唯一通道
#[derive(Clone)]
pub struct StatusReporter {
    instance: u64,
    tx: mpsc::UnboundedSender<ReportedStatus>,
}

impl StatusReporter {
    pub fn report(&self, update: StatusUpdate) {
        let reported = ReportedStatus {
            instance: self.instance,
            update,
        };

        if self.tx.send(reported).is_err() {
            debug!(instance = self.instance, "coordinator gone, status update dropped");
        }
    }

    #[cfg(test)]
    pub(crate) fn channel(instance: u64) -> (Self, mpsc::UnboundedReceiver<ReportedStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { instance, tx }, rx)
    }
}

enum CoordinatorCommand {
    TurnOn {
        reply: oneshot::Sender<bool>,
    },
    TurnOff {
        reply: oneshot::Sender<bool>,
    },
    AddJob {
        id: JobId,
        initial_status: UploadStatus,
        reply: oneshot::Sender<bool>,
    },
    SendToJob {
        id: JobId,
        command: JobCommand,
        reply: oneshot::Sender<bool>,
    },
    RemoveAllJobs {
        reply: oneshot::Sender<usize>,
    },
    GetJob {
        id: JobId,
        reply: oneshot::Sender<Option<JobSnapshot>>,
    },
    GetAllJobs {
        reply: oneshot::Sender<Vec<JobSnapshot>>,
    },
    GetState {
        reply: oneshot::Sender<CoordinatorState>,
    },
    Shutdown,
}

/// 协调器：所有上传任务的注册表和事件路由
#[derive(Clone)]
pub struct UploadCoordinator {
    command_tx: mpsc::Sender<CoordinatorCommand>,
    event_tx: broadcast::Sender<CoordinatorEvent>,
}

/// 协调器句柄 - 包含协调器和工作线程
pub struct CoordinatorHandle {
    pub coordinator: UploadCoordinator,
    pub worker_handle: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// 停止工作线程，所有任务随之中止
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.coordinator.command_tx.send(CoordinatorCommand::Shutdown).await;
        drop(self.coordinator);
        self.worker_handle
            .await
            .map_err(|err| UploadError::internal_error(format!("Worker panic: {}", err)))
    }
}

impl UploadCoordinator {
    pub fn new(transport: Arc<dyn PartTransport>, config: UploadConfig) -> CoordinatorHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // 最多缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);

        let worker_handle = tokio::spawn(CoordinatorWorker::run(
            transport,
            config,
            command_rx,
            event_tx.clone(),
        ));

        CoordinatorHandle {
            coordinator: Self { command_tx, event_tx },
            worker_handle,
        }
    }

    /// 分片直接 PUT 到预签名地址
    pub fn with_http(config: UploadConfig) -> CoordinatorHandle {
        Self::new(Arc::new(HttpPartTransport::new()), config)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }

    /// Idle -> Active，返回是否发生了转换
    pub async fn turn_on(&self) -> Result<bool> {
        self.request(|reply| CoordinatorCommand::TurnOn { reply }).await
    }

    /// Active -> Done，中止并清空所有任务
    pub async fn turn_off(&self) -> Result<bool> {
        self.request(|reply| CoordinatorCommand::TurnOff { reply }).await
    }

    /// 创建并启动任务，协调器不是 Active 或 id 已存在时什么也不做并返回 false
    pub async fn add_job(&self, id: impl Into<JobId>, initial_status: UploadStatus) -> Result<bool> {
        let id = id.into();
        self.request(|reply| CoordinatorCommand::AddJob { id, initial_status, reply }).await
    }

    /// 按 id 转发事件，未知 id 返回 false
    pub async fn send_to_job(&self, id: &JobId, command: JobCommand) -> Result<bool> {
        let id = id.clone();
        self.request(|reply| CoordinatorCommand::SendToJob { id, command, reply }).await
    }

    /// 清空注册表，返回移除的任务数
    pub async fn remove_all_jobs(&self) -> Result<usize> {
        self.request(|reply| CoordinatorCommand::RemoveAllJobs { reply }).await
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobSnapshot>> {
        let id = id.clone();
        self.request(|reply| CoordinatorCommand::GetJob { id, reply }).await
    }

    pub async fn get_all_jobs(&self) -> Result<Vec<JobSnapshot>> {
        self.request(|reply| CoordinatorCommand::GetAllJobs { reply }).await
    }

    pub async fn state(&self) -> Result<CoordinatorState> {
        self.request(|reply| CoordinatorCommand::GetState { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| UploadError::CoordinatorShutdown)?;

        reply_rx.await.map_err(|_| UploadError::CoordinatorShutdown)
    }
}

struct JobEntry {
    handle: JobHandle,
    instance: u64,
    snapshot: JobSnapshot,
}

struct CoordinatorWorker {
    state: CoordinatorState,
    config: UploadConfig,
    transport: Arc<dyn PartTransport>,
    jobs: HashMap<JobId, JobEntry>,
    next_instance: u64,
    event_tx: broadcast::Sender<CoordinatorEvent>,
    status_tx: mpsc::UnboundedSender<ReportedStatus>,
}

impl CoordinatorWorker {
    async fn run(
        transport: Arc<dyn PartTransport>,
        config: UploadConfig,
        mut command_rx: mpsc::Receiver<CoordinatorCommand>,
        event_tx: broadcast::Sender<CoordinatorEvent>,
    ) {
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            state: CoordinatorState::Idle,
            config,
            transport,
            jobs: HashMap::new(),
            next_instance: 0,
            event_tx,
            status_tx,
        };

        // 主事件循环：外部命令和任务上报
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(CoordinatorCommand::Shutdown) | None => break,
                    Some(command) => worker.handle_command(command),
                },
                Some(reported) = status_rx.recv() => {
                    worker.update_status(reported);
                }
            }
        }

        let removed = worker.clear_jobs();
        info!(removed, "coordinator worker stopped");
    }

    fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::TurnOn { reply } => {
                let _ = reply.send(self.turn_on());
            }
            CoordinatorCommand::TurnOff { reply } => {
                let _ = reply.send(self.turn_off());
            }
            CoordinatorCommand::AddJob { id, initial_status, reply } => {
                let _ = reply.send(self.add_job(id, initial_status));
            }
            CoordinatorCommand::SendToJob { id, command, reply } => {
                let _ = reply.send(self.send_to_job(&id, command));
            }
            CoordinatorCommand::RemoveAllJobs { reply } => {
                let _ = reply.send(self.clear_jobs());
            }
            CoordinatorCommand::GetJob { id, reply } => {
                let _ = reply.send(self.jobs.get(&id).map(|entry| entry.snapshot.clone()));
            }
            CoordinatorCommand::GetAllJobs { reply } => {
                let mut snapshots: Vec<JobSnapshot> =
                    self.jobs.values().map(|entry| entry.snapshot.clone()).collect();
                snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
                let _ = reply.send(snapshots);
            }
            CoordinatorCommand::GetState { reply } => {
                let _ = reply.send(self.state);
            }
            CoordinatorCommand::Shutdown => {}
        }
    }

    fn turn_on(&mut self) -> bool {
        if self.state != CoordinatorState::Idle {
            warn!(state = ?self.state, "turn_on ignored");
            return false;
        }

        self.set_state(CoordinatorState::Active);
        true
    }

    fn turn_off(&mut self) -> bool {
        if self.state != CoordinatorState::Active {
            warn!(state = ?self.state, "turn_off ignored");
            return false;
        }

        self.clear_jobs();
        self.set_state(CoordinatorState::Done);
        true
    }

    fn add_job(&mut self, id: JobId, initial_status: UploadStatus) -> bool {
        if self.state != CoordinatorState::Active {
            debug!(job_id = %id, state = ?self.state, "coordinator not active, job not admitted");
            return false;
        }

        if self.jobs.contains_key(&id) {
            warn!(job_id = %id, "job already registered");
            return false;
        }

        self.next_instance += 1;
        let instance = self.next_instance;
        let ctx = JobContext {
            config: self.config.clone(),
            transport: self.transport.clone(),
            reporter: StatusReporter {
                instance,
                tx: self.status_tx.clone(),
            },
            cancel: CancellationToken::new(),
        };

        let handle = UploadJob::spawn(id.clone(), ctx);
        self.jobs.insert(id.clone(), JobEntry {
            handle,
            instance,
            snapshot: JobSnapshot::new(id.clone(), initial_status),
        });

        info!(job_id = %id, "job added");
        let _ = self.event_tx.send(CoordinatorEvent::JobAdded { job_id: id });
        true
    }

    fn send_to_job(&mut self, id: &JobId, command: JobCommand) -> bool {
        let Some(entry) = self.jobs.get(id) else {
            debug!(job_id = %id, event = command.name(), "unknown job, event dropped");
            return false;
        };

        let delivered = entry.handle.send(command);
        if !delivered {
            debug!(job_id = %id, "job already finished, event dropped");
        }
        delivered
    }

    fn update_status(&mut self, reported: ReportedStatus) {
        let update = reported.update;
        let entry = match self.jobs.get_mut(&update.job_id) {
            Some(entry) if entry.instance == reported.instance => entry,
            _ => {
                debug!(job_id = %update.job_id, "stale status update discarded");
                return;
            }
        };

        entry.snapshot.merge(&update);
        debug!(
            job_id = %update.job_id,
            status = ?update.status,
            origin = ?update.origin,
            "job status updated"
        );
        let _ = self.event_tx.send(CoordinatorEvent::StatusChanged(entry.snapshot.clone()));
    }

    /// 中止所有任务（包括进行中的请求）并清空注册表
    fn clear_jobs(&mut self) -> usize {
        let count = self.jobs.len();
        for (_, entry) in self.jobs.drain() {
            entry.handle.abort();
        }

        if count > 0 {
            info!(count, "all jobs removed");
        }
        let _ = self.event_tx.send(CoordinatorEvent::JobsCleared { count });
        count
    }

    fn set_state(&mut self, new_state: CoordinatorState) {
        let old_state = self.state;
        self.state = new_state;
        info!(?old_state, ?new_state, "coordinator state changed");
        let _ = self.event_tx.send(CoordinatorEvent::StateChanged { old_state, new_state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::core::{StartUploadPayload, StatusOrigin, UploadFiles};
    use crate::tests::{memory_video, test_config, MockMediaService, MockTransport, PartBehavior};

    fn start(transport: Arc<MockTransport>) -> CoordinatorHandle {
        UploadCoordinator::new(transport, test_config(1024))
    }

    fn start_upload(service: Arc<MockMediaService>) -> JobCommand {
        JobCommand::StartUpload(StartUploadPayload {
            files: UploadFiles { video: memory_video(4096) },
            company_id: "company-1".to_string(),
            media_service: service,
            progress_callback: None,
        })
    }

    async fn wait_for_status(
        events: &mut broadcast::Receiver<CoordinatorEvent>,
        id: &JobId,
        status: UploadStatus,
    ) -> JobSnapshot {
        loop {
            if let CoordinatorEvent::StatusChanged(snapshot) = events.recv().await.unwrap() {
                if &snapshot.id == id && snapshot.status == status {
                    return snapshot;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let handle = start(Arc::new(MockTransport::new()));
        let coordinator = handle.coordinator.clone();

        assert_eq!(coordinator.state().await.unwrap(), CoordinatorState::Idle);
        assert!(!coordinator.turn_off().await.unwrap());
        assert!(coordinator.turn_on().await.unwrap());
        assert!(!coordinator.turn_on().await.unwrap());
        assert!(coordinator.turn_off().await.unwrap());
        assert_eq!(coordinator.state().await.unwrap(), CoordinatorState::Done);
        assert!(!coordinator.turn_on().await.unwrap());
        assert!(!coordinator.add_job("job-1", UploadStatus::Pending).await.unwrap());

        handle.shutdown().await.unwrap();
        assert!(matches!(coordinator.state().await, Err(UploadError::CoordinatorShutdown)));
    }

    #[tokio::test]
    async fn test_add_job_requires_active_and_unique_id() {
        let handle = start(Arc::new(MockTransport::new()));
        let coordinator = handle.coordinator.clone();

        assert!(!coordinator.add_job("job-1", UploadStatus::Pending).await.unwrap());
        assert!(coordinator.get_all_jobs().await.unwrap().is_empty());

        coordinator.turn_on().await.unwrap();
        assert!(coordinator.add_job("job-1", UploadStatus::Pending).await.unwrap());
        assert!(!coordinator.add_job("job-1", UploadStatus::Pending).await.unwrap());

        let snapshot = coordinator.get_job(&JobId::from("job-1")).await.unwrap().unwrap();
        assert_eq!(snapshot.status, UploadStatus::Pending);
        assert_eq!(snapshot.origin, None);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_job_is_a_noop() {
        let handle = start(Arc::new(MockTransport::new()));
        let coordinator = handle.coordinator.clone();
        coordinator.turn_on().await.unwrap();

        let delivered = coordinator
            .send_to_job(&JobId::from("missing"), start_upload(Arc::new(MockMediaService::new())))
            .await
            .unwrap();
        assert!(!delivered);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_updates_are_merged() {
        let handle = start(Arc::new(MockTransport::new()));
        let coordinator = handle.coordinator.clone();
        let mut events = coordinator.subscribe();
        let id = JobId::from("job-1");

        coordinator.turn_on().await.unwrap();
        coordinator.add_job(id.clone(), UploadStatus::Pending).await.unwrap();
        coordinator.send_to_job(&id, start_upload(Arc::new(MockMediaService::new()))).await.unwrap();

        let ready = wait_for_status(&mut events, &id, UploadStatus::Ready).await;
        assert_eq!(ready.origin, Some(StatusOrigin::Ready));
        assert_eq!(ready.media_id.as_deref(), Some("media-1"));
        assert_eq!(coordinator.get_job(&id).await.unwrap(), Some(ready));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_all_aborts_in_flight_uploads() {
        let transport = Arc::new(MockTransport::with_default(PartBehavior::Hang));
        let handle = start(transport.clone());
        let coordinator = handle.coordinator.clone();
        let mut events = coordinator.subscribe();
        let id = JobId::from("job-1");

        coordinator.turn_on().await.unwrap();
        coordinator.add_job(id.clone(), UploadStatus::Pending).await.unwrap();
        coordinator.send_to_job(&id, start_upload(Arc::new(MockMediaService::new()))).await.unwrap();
        wait_for_status(&mut events, &id, UploadStatus::Uploading).await;

        while transport.attempts().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(coordinator.remove_all_jobs().await.unwrap(), 1);
        assert!(coordinator.get_all_jobs().await.unwrap().is_empty());
        assert!(!coordinator.send_to_job(&id, start_upload(Arc::new(MockMediaService::new()))).await.unwrap());

        // 同一个 id 可以重新加入
        assert!(coordinator.add_job(id.clone(), UploadStatus::Pending).await.unwrap());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_reports_are_discarded() {
        let (status_tx, _status_rx) = mpsc::unbounded_channel();
        let (event_tx, mut events) = broadcast::channel(16);
        let mut worker = CoordinatorWorker {
            state: CoordinatorState::Active,
            config: test_config(1024),
            transport: Arc::new(MockTransport::new()),
            jobs: HashMap::new(),
            next_instance: 0,
            event_tx,
            status_tx,
        };

        let id = JobId::from("job-1");
        assert!(worker.add_job(id.clone(), UploadStatus::Pending));
        let update = StatusUpdate {
            job_id: id.clone(),
            status: UploadStatus::Error,
            origin: StatusOrigin::Failed,
            media_id: None,
            error_message: Some("old".to_string()),
        };

        worker.update_status(ReportedStatus { instance: 99, update: update.clone() });
        assert_eq!(worker.jobs[&id].snapshot.status, UploadStatus::Pending);

        worker.update_status(ReportedStatus { instance: 1, update });
        assert_eq!(worker.jobs[&id].snapshot.status, UploadStatus::Error);
        assert_eq!(worker.jobs[&id].snapshot.error_message.as_deref(), Some("old"));

        assert!(matches!(events.recv().await.unwrap(), CoordinatorEvent::JobAdded { .. }));
        assert!(matches!(events.recv().await.unwrap(), CoordinatorEvent::StatusChanged(_)));
        worker.clear_jobs();
    }
}
