use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;
use crate::core::{
    CreateMediaRequest,
    CreatedMedia,
    MediaObject,
    MediaService,
    MultipartMeta,
    PresignedPart,
    Result,
    UploadError,
};

/// 后端错误响应体，`{ message }` 或 `{ error: { message } }`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<NestedError>,
}

#[derive(Debug, Deserialize)]
struct NestedError {
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct FinalizeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    multipart: Option<&'a MultipartMeta>,
}

/// REST 媒体服务
#[derive(Debug, Clone)]
pub struct HttpMediaService {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpMediaService {
    pub fn new(endpoint: &str, token: Option<String>) -> Self {
        Self::with_client(Client::new(), endpoint, token)
    }

    pub fn with_client(client: Client, endpoint: &str, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.filter(|token| !token.is_empty()),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}{}", self.endpoint, path))?)
    }

    /// `{endpoint}/media/{id}/...`，id 按路径段编码
    fn media_url(&self, media_id: &str, rest: &[&str]) -> Result<Url> {
        let mut url = self.url("/media")?;
        url.path_segments_mut()
            .map_err(|_| UploadError::Config(format!("endpoint {} cannot be a base url", self.endpoint)))?
            .push(media_id)
            .extend(rest);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.message.or(body.error.and_then(|error| error.message)));

        match message {
            Some(message) => Err(UploadError::Api {
                status_code: status.as_u16(),
                message: Some(message),
            }),
            None => Err(UploadError::server_error(status.as_u16(), text)),
        }
    }
}

#[async_trait]
impl MediaService for HttpMediaService {
    #[instrument(skip_all, fields(file = %request.file_name, size = request.size))]
    async fn create(&self, request: CreateMediaRequest) -> Result<CreatedMedia> {
        let response = self
            .authorize(self.client.post(self.url("/media")?))
            .json(&request)
            .send()
            .await?;

        let created: CreatedMedia = Self::check(response).await?.json().await?;
        debug!(media_id = %created.id, "media created");
        Ok(created)
    }

    #[instrument(skip(self, key, upload_id))]
    async fn get_presigned_url_for_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<PresignedPart> {
        let mut url = self.url("/media/multipart/presigned-url")?;
        url.query_pairs_mut()
            .append_pair("key", key)
            .append_pair("uploadId", upload_id)
            .append_pair("partNumber", &part_number.to_string());

        let response = self.authorize(self.client.get(url)).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self, multipart))]
    async fn finalize(&self, media_id: &str, multipart: Option<&MultipartMeta>) -> Result<()> {
        let response = self
            .authorize(self.client.post(self.media_url(media_id, &["finalize"])?))
            .json(&FinalizeRequest { multipart })
            .send()
            .await?;

        Self::check(response).await?;
        debug!(parts = multipart.map(|meta| meta.parts.len()).unwrap_or(0), "upload finalized");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, media_id: &str) -> Result<MediaObject> {
        let response = self
            .authorize(self.client.get(self.media_url(media_id, &[])?))
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use crate::core::{describe_error, CompletedPart, MediaStatus};

    fn create_request() -> CreateMediaRequest {
        CreateMediaRequest {
            path: "/videos/holiday.mp4".to_string(),
            company_id: "company-1".to_string(),
            title: "holiday".to_string(),
            content_type: "video/mp4".to_string(),
            description: None,
            size: 2048,
            file_name: "holiday.mp4".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_sends_camel_case_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/media"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({
                "path": "/videos/holiday.mp4",
                "companyId": "company-1",
                "title": "holiday",
                "contentType": "video/mp4",
                "description": null,
                "size": 2048,
                "fileName": "holiday.mp4"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "media-1",
                "video": { "key": "videos/media-1.mp4", "uploadId": "upload-1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = HttpMediaService::new(&format!("{}/api/", server.uri()), Some("secret".to_string()));
        let created = service.create(create_request()).await.unwrap();

        assert_eq!(created.id, "media-1");
        assert_eq!(created.video.upload_id, "upload-1");
    }

    #[tokio::test]
    async fn test_structured_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/media"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "Storage quota exceeded" })))
            .mount(&server)
            .await;

        let err = HttpMediaService::new(&server.uri(), None)
            .create(create_request())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Api { status_code: 403, .. }));
        assert_eq!(describe_error(&err, "Failed to create media"), "Storage quota exceeded");
    }

    #[tokio::test]
    async fn test_nested_and_unstructured_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/nested"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": { "message": "Invalid id" } })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/plain"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&server)
            .await;

        let service = HttpMediaService::new(&server.uri(), None);

        let err = service.get_by_id("nested").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid id");

        let err = service.get_by_id("plain").await.unwrap_err();
        assert!(matches!(err, UploadError::ServerError { status_code: 502, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_presigned_url_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/multipart/presigned-url"))
            .and(query_param("key", "videos/media-1.mp4"))
            .and(query_param("uploadId", "upload-1"))
            .and(query_param("partNumber", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": "https://s3.test/part3" })))
            .expect(1)
            .mount(&server)
            .await;

        let presigned = HttpMediaService::new(&server.uri(), None)
            .get_presigned_url_for_part("videos/media-1.mp4", "upload-1", 3)
            .await
            .unwrap();

        assert_eq!(presigned.url, "https://s3.test/part3");
    }

    #[tokio::test]
    async fn test_finalize_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/media/media-1/finalize"))
            .and(body_json(json!({
                "multipart": {
                    "key": "videos/media-1.mp4",
                    "uploadId": "upload-1",
                    "parts": [
                        { "PartNumber": 1, "ETag": "a" },
                        { "PartNumber": 2, "ETag": "b" }
                    ]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let meta = MultipartMeta {
            key: "videos/media-1.mp4".to_string(),
            upload_id: "upload-1".to_string(),
            parts: vec![
                CompletedPart { part_number: 1, etag: "a".to_string() },
                CompletedPart { part_number: 2, etag: "b".to_string() },
            ],
        };

        HttpMediaService::new(&server.uri(), None)
            .finalize("media-1", Some(&meta))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_by_id_parses_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/media-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "media-1",
                "status": "MEZZANINE_FINALIZING",
                "timeLeftInSeconds": 45
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/media-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "media-2",
                "status": "QUEUED_FOR_REVIEW",
                "error": { "reason": "n/a" }
            })))
            .mount(&server)
            .await;

        let service = HttpMediaService::new(&server.uri(), None);

        let object = service.get_by_id("media-1").await.unwrap();
        assert_eq!(object.status, MediaStatus::MezzanineFinalizing);
        assert_eq!(object.time_left_in_seconds, Some(45.0));
        assert!(object.error.is_none());

        let object = service.get_by_id("media-2").await.unwrap();
        assert_eq!(object.status, MediaStatus::Unknown);
        assert!(!object.status.is_terminal());
        assert_eq!(object.time_left_in_seconds, None);
    }

    #[tokio::test]
    async fn test_get_by_id_accepts_null_and_fractional_time_left() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "status": "TRANSCODING",
                "timeLeftInSeconds": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/m2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m2",
                "status": "TRANSCODING",
                "timeLeftInSeconds": 12.5
            })))
            .mount(&server)
            .await;

        let service = HttpMediaService::new(&server.uri(), None);

        let object = service.get_by_id("m1").await.unwrap();
        assert_eq!(object.status, MediaStatus::Transcoding);
        assert_eq!(object.time_left_in_seconds, None);

        let object = service.get_by_id("m2").await.unwrap();
        assert_eq!(object.time_left_in_seconds, Some(12.5));
    }

    #[tokio::test]
    async fn test_media_id_is_path_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/media/a%2Fb%3Fc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "a/b?c",
                "status": "READY"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/media/a%2Fb%3Fc/finalize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let service = HttpMediaService::new(&format!("{}/v1/", server.uri()), None);

        let object = service.get_by_id("a/b?c").await.unwrap();
        assert_eq!(object.id, "a/b?c");
        service.finalize("a/b?c", None).await.unwrap();
    }
}
