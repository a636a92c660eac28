use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 后端返回的结构化错误（带 message 的 JSON body）
    #[error("{}", api_message(.status_code, .message))]
    Api {
        status_code: u16,
        message: Option<String>,
    },

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    /// 外部协作方直接给出的错误信息，原样展示
    #[error("{0}")]
    Service(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upload stalled: no progress for {0:?}")]
    Stalled(Duration),

    #[error("Upload was aborted")]
    Aborted,

    #[error("Part {part_number} response carried no ETag")]
    MissingETag {
        part_number: u32,
    },

    #[error("max retries ({retries}) exceeded: {source}")]
    RetryLimitExceeded {
        retries: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("Part {part_number} upload failed: {source}")]
    Part {
        part_number: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Deserialize error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("Coordinator shut down")]
    CoordinatorShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

fn api_message(status_code: &u16, message: &Option<String>) -> String {
    match message {
        Some(message) if !message.is_empty() => message.clone(),
        _ => format!("API request failed with status {}", status_code),
    }
}

impl UploadError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 网络错误、超时、卡顿以及 5xx/429 可以重试，其余都视为终态错误
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Http(err) => {
                err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
            }
            UploadError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::UnexpectedEof
            ),
            UploadError::Timeout(_) | UploadError::Stalled(_) => true,
            UploadError::ServerError { status_code, .. } | UploadError::Api { status_code, .. } => {
                *status_code >= 500 || *status_code == 429
            }
            _ => false,
        }
    }
}

impl From<toml::de::Error> for UploadError {
    fn from(err: toml::de::Error) -> Self {
        UploadError::Config(err.to_string())
    }
}

/// Message shown to the user for a failed phase.
///
/// Structured API message first, then the raw error text, then `fallback`.
pub fn describe_error(err: &UploadError, fallback: &str) -> String {
    if let UploadError::Api { message: Some(message), .. } = err {
        if !message.trim().is_empty() {
            return message.clone();
        }
    }

    let raw = err.to_string();
    if raw.trim().is_empty() {
        fallback.to_string()
    } else {
        raw
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
