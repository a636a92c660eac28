use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::{Body, Client};
use tracing::debug;
use crate::core::{PartRequest, PartResponse, PartTransport, Result, UploadError};

/// 直接 PUT 到预签名地址
#[derive(Debug, Clone, Default)]
pub struct HttpPartTransport {
    client: Client,
}

impl HttpPartTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn parse_etag(value: &str) -> Option<String> {
    let etag = value.trim().trim_matches('"');
    if etag.is_empty() {
        None
    } else {
        Some(etag.to_string())
    }
}

#[async_trait]
impl PartTransport for HttpPartTransport {
    async fn put_part(&self, request: PartRequest) -> Result<PartResponse> {
        let response = self
            .client
            .put(&request.url)
            .header(CONTENT_TYPE, &request.content_type)
            .header(CONTENT_LENGTH, request.content_length)
            .body(Body::wrap_stream(request.body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::server_error(status.as_u16(), message));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_etag);

        debug!(part = request.part_number, status = status.as_u16(), etag = ?etag, "part response");
        Ok(PartResponse { etag })
    }
}
