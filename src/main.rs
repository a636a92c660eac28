use std::sync::Arc;
use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use media_uploader::client::HttpMediaService;
use media_uploader::config::{Config, DEFAULT_CONFIG_PATH};
use media_uploader::core::{
    CoordinatorEvent,
    JobCommand,
    JobId,
    ProgressCallback,
    StartUploadPayload,
    UploadCoordinator,
    UploadFiles,
    UploadStatus,
    VideoFile,
};
use media_uploader::utils::{format_bytes, format_duration, format_speed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("media_uploader=info")),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path).with_context(|| format!("loading {}", config_path))?;

    let mut video = VideoFile::from_path(&config.file_path, config.mime_type())
        .await
        .with_context(|| format!("opening {}", config.file_path))?;
    video.title = config.title.clone();
    video.description = config.description.clone();

    let service = Arc::new(HttpMediaService::new(&config.endpoint, config.token.clone()));
    let handle = UploadCoordinator::with_http(config.upload.clone());
    let coordinator = handle.coordinator.clone();
    let mut events = coordinator.subscribe();

    let progress: ProgressCallback = Arc::new(|job_id, snapshot| {
        tracing::info!(
            job_id = %job_id,
            "{:.1}% {}/{} at {}, {} left",
            snapshot.percentage,
            format_bytes(snapshot.uploaded_bytes),
            format_bytes(snapshot.total_bytes),
            format_speed(snapshot.speed_bytes_per_sec),
            format_duration(std::time::Duration::try_from_secs_f64(snapshot.eta_seconds).unwrap_or_default()),
        );
    });

    let job_id = JobId::new();
    coordinator.turn_on().await?;
    if !coordinator.add_job(job_id.clone(), UploadStatus::Pending).await? {
        bail!("coordinator refused job {}", job_id);
    }

    let command = JobCommand::StartUpload(StartUploadPayload {
        files: UploadFiles { video },
        company_id: config.company_id.clone(),
        media_service: service,
        progress_callback: Some(progress),
    });
    coordinator.send_to_job(&job_id, command).await?;

    let outcome = loop {
        match events.recv().await {
            Ok(CoordinatorEvent::StatusChanged(snapshot)) if snapshot.id == job_id => {
                tracing::info!(status = ?snapshot.status, origin = ?snapshot.origin, "upload status");
                match snapshot.status {
                    UploadStatus::Ready | UploadStatus::Error => break snapshot,
                    _ => {}
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed coordinator events");
                if let Some(snapshot) = coordinator.get_job(&job_id).await? {
                    if matches!(snapshot.status, UploadStatus::Ready | UploadStatus::Error) {
                        break snapshot;
                    }
                }
            }
            Err(RecvError::Closed) => bail!("coordinator stopped before the upload finished"),
        }
    };

    coordinator.turn_off().await?;
    handle.shutdown().await?;

    match outcome.status {
        UploadStatus::Ready => {
            tracing::info!(media_id = ?outcome.media_id, "upload complete");
            Ok(())
        }
        _ => bail!(
            "upload failed: {}",
            outcome.error_message.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}
