//! Calls the forwarding server the way the browser client does.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::domain::normalizer;
use crate::error::{ClientError, ClientResult};
use crate::models::{AiSettings, ChatMessage, ModelTestReport};

/// Images above this size are left out of the request.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const FALLBACK_IMAGE_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    DataUri(String),
    File(PathBuf),
    /// Fetched over http(s) when the request is built.
    Url(String),
}

struct LoadedImage {
    bytes: Vec<u8>,
    mime: String,
    file_name: String,
}

impl ImageSource {
    /// Reference stored alongside the user message.
    pub fn preview(&self) -> String {
        match self {
            ImageSource::DataUri(uri) => uri.clone(),
            ImageSource::File(path) => path.display().to_string(),
            ImageSource::Url(url) => url.clone(),
        }
    }

    async fn load(&self, http: &Client) -> ClientResult<LoadedImage> {
        match self {
            ImageSource::DataUri(uri) => {
                let (bytes, mime) = decode_data_uri(uri)?;
                let ext = mime_guess::get_mime_extensions_str(&mime)
                    .and_then(|exts| exts.first())
                    .copied()
                    .unwrap_or("jpg");
                Ok(LoadedImage {
                    bytes,
                    file_name: format!("image.{ext}"),
                    mime,
                })
            }
            ImageSource::File(path) => {
                let bytes = tokio::fs::read(path).await?;
                let mime = mime_guess::from_path(path)
                    .first()
                    .map(|m| m.essence_str().to_string())
                    .unwrap_or_else(|| FALLBACK_IMAGE_MIME.to_string());
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image.jpg".to_string());
                Ok(LoadedImage { bytes, mime, file_name })
            }
            ImageSource::Url(raw) => {
                let url = Url::parse(raw).map_err(|e| ClientError::Validation(format!("image URL: {e}")))?;
                let response = http.get(url.clone()).send().await?.error_for_status()?;
                let mime = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(';').next())
                    .map(|v| v.trim().to_string())
                    .filter(|v| v.starts_with("image/"))
                    .or_else(|| mime_guess::from_path(url.path()).first().map(|m| m.essence_str().to_string()))
                    .unwrap_or_else(|| FALLBACK_IMAGE_MIME.to_string());
                let file_name = url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|name| !name.is_empty())
                    .unwrap_or("image.jpg")
                    .to_string();
                let bytes = response.bytes().await?.to_vec();
                Ok(LoadedImage { bytes, mime, file_name })
            }
        }
    }
}

fn decode_data_uri(uri: &str) -> ClientResult<(Vec<u8>, String)> {
    let invalid = || ClientError::Validation("image is not a valid data URI".to_string());
    let (meta, payload) = uri.strip_prefix("data:").and_then(|rest| rest.split_once(',')).ok_or_else(invalid)?;

    let mime = meta
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or(FALLBACK_IMAGE_MIME)
        .to_string();
    let bytes = if meta.ends_with(";base64") {
        STANDARD.decode(payload.trim()).map_err(|_| invalid())?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok((bytes, mime))
}

/// Builds the optional `image` form part; problems only cost the attachment.
async fn image_part(http: &Client, image: &ImageSource) -> Option<Part> {
    let loaded = match image.load(http).await {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(error = %e, "skipping unreadable image");
            return None;
        }
    };
    if loaded.bytes.len() > MAX_IMAGE_BYTES {
        warn!(bytes = loaded.bytes.len(), "skipping image larger than 5 MiB");
        return None;
    }
    Part::bytes(loaded.bytes)
        .file_name(loaded.file_name)
        .mime_str(&loaded.mime)
        .map_err(|e| warn!(error = %e, mime = %loaded.mime, "skipping image with unusable mime type"))
        .ok()
}

/// Anything that can turn a conversation history into an assistant reply.
#[async_trait]
pub trait ReplySource: Send + Sync + 'static {
    async fn reply(
        &self,
        messages: &[ChatMessage],
        settings: &AiSettings,
        image: Option<&ImageSource>,
    ) -> ClientResult<String>;
}

#[derive(Clone)]
pub struct CornCareClient {
    http: Client,
    base_url: String,
}

impl CornCareClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub async fn generate_reply(
        &self,
        messages: &[ChatMessage],
        settings: &AiSettings,
        image: Option<&ImageSource>,
    ) -> ClientResult<String> {
        if messages.is_empty() {
            return Err(ClientError::Validation("no conversation messages to send".to_string()));
        }

        let mut form = Form::new()
            .text("messages", serde_json::to_string(messages)?)
            .text("ai_settings", serde_json::to_string(settings)?);
        if let Some(image) = image {
            if let Some(part) = image_part(&self.http, image).await {
                form = form.part("image", part);
            }
        }

        info!(messages = messages.len(), model = %settings.model_name, "requesting assistant reply");
        let response = self.http.post(self.endpoint("/api/query")).multipart(form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        normalizer::normalize(status, &body)
    }

    /// Asks the server whether the backend is reachable with these settings.
    pub async fn test_model(&self, settings: &AiSettings) -> ClientResult<()> {
        if settings.api_key.trim().is_empty() {
            return Err(ClientError::Validation("enter an API key first".to_string()));
        }

        let response = self
            .http
            .post(self.endpoint("/api/test-ai-model"))
            .json(settings)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ClientError::Backend {
                status,
                message: format!("model connection failed: {}", normalizer::error_message(status, &body)),
            });
        }

        let report: ModelTestReport = serde_json::from_str(&body)?;
        if !report.success {
            return Err(ClientError::Backend {
                status,
                message: report.error.unwrap_or_else(|| "model connection test failed".to_string()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReplySource for CornCareClient {
    async fn reply(
        &self,
        messages: &[ChatMessage],
        settings: &AiSettings,
        image: Option<&ImageSource>,
    ) -> ClientResult<String> {
        self.generate_reply(messages, settings, image).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::test_support::{dead_backend, spawn};
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    /// Reports which form fields arrived.
    async fn inspect_form(body: Bytes) -> Json<serde_json::Value> {
        let raw = String::from_utf8_lossy(&body);
        let summary = format!(
            "messages={} settings={} image={} png={}",
            raw.contains("name=\"messages\""),
            raw.contains("name=\"ai_settings\""),
            raw.contains("name=\"image\""),
            raw.contains("Content-Type: image/png"),
        );
        Json(json!({ "data": summary }))
    }

    fn client(base: &str) -> CornCareClient {
        CornCareClient::new(base, Duration::from_secs(5)).unwrap()
    }

    fn history() -> Vec<ChatMessage> {
        vec![ChatMessage {
            role: Role::User,
            content: "What causes gray leaf spot?".into(),
            image: None,
        }]
    }

    fn png_data_uri(len: usize) -> ImageSource {
        ImageSource::DataUri(format!("data:image/png;base64,{}", STANDARD.encode(vec![7u8; len])))
    }

    #[tokio::test]
    async fn empty_history_fails_before_any_request() {
        let err = client(&dead_backend())
            .generate_reply(&[], &AiSettings::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn sends_history_settings_and_image() {
        let base = spawn(Router::new().route("/api/query", post(inspect_form))).await;
        let reply = client(&base)
            .generate_reply(&history(), &AiSettings::default(), Some(&png_data_uri(64)))
            .await
            .unwrap();
        assert_eq!(reply, "messages=true settings=true image=true png=true");
    }

    #[tokio::test]
    async fn oversized_or_broken_images_are_dropped() {
        let base = spawn(Router::new().route("/api/query", post(inspect_form))).await;
        let c = client(&base);

        let reply = c
            .generate_reply(&history(), &AiSettings::default(), Some(&png_data_uri(MAX_IMAGE_BYTES + 1)))
            .await
            .unwrap();
        assert!(reply.contains("image=false"));

        let broken = ImageSource::DataUri("data:image/png;base64,@@@".into());
        let reply = c.generate_reply(&history(), &AiSettings::default(), Some(&broken)).await.unwrap();
        assert!(reply.contains("image=false"));

        let missing = ImageSource::File(PathBuf::from("/definitely/not/here.png"));
        let reply = c.generate_reply(&history(), &AiSettings::default(), Some(&missing)).await.unwrap();
        assert!(reply.contains("image=false"));
    }

    #[tokio::test]
    async fn file_images_carry_a_guessed_mime_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let base = spawn(Router::new().route("/api/query", post(inspect_form))).await;
        let reply = client(&base)
            .generate_reply(&history(), &AiSettings::default(), Some(&ImageSource::File(path)))
            .await
            .unwrap();
        assert_eq!(reply, "messages=true settings=true image=true png=true");
    }

    #[tokio::test]
    async fn url_images_are_fetched_or_skipped() {
        let base = spawn(
            Router::new()
                .route("/api/query", post(inspect_form))
                .route(
                    "/images/leaf.png",
                    get(|| async { ([(CONTENT_TYPE, "image/png")], vec![0x89, b'P', b'N', b'G']) }),
                ),
        )
        .await;
        let c = client(&base);

        let found = ImageSource::Url(format!("{base}/images/leaf.png"));
        let reply = c.generate_reply(&history(), &AiSettings::default(), Some(&found)).await.unwrap();
        assert_eq!(reply, "messages=true settings=true image=true png=true");

        let missing = ImageSource::Url(format!("{base}/images/gone.png"));
        let reply = c.generate_reply(&history(), &AiSettings::default(), Some(&missing)).await.unwrap();
        assert!(reply.contains("image=false"));

        let unreachable = ImageSource::Url(format!("{}/leaf.png", dead_backend()));
        let reply = c.generate_reply(&history(), &AiSettings::default(), Some(&unreachable)).await.unwrap();
        assert!(reply.contains("image=false"));
    }

    #[tokio::test]
    async fn backend_validation_errors_are_surfaced() {
        let base = spawn(Router::new().route(
            "/api/query",
            post(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "detail": [{ "msg": "messages: field required" }] })),
                )
            }),
        ))
        .await;
        let err = client(&base)
            .generate_reply(&history(), &AiSettings::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Backend { status: 422, .. }));
        assert_eq!(err.to_string(), "messages: field required");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let err = client(&dead_backend())
            .generate_reply(&history(), &AiSettings::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn model_test_checks_success_flag() {
        let settings = AiSettings {
            api_key: "sk-test-123456".into(),
            ..AiSettings::default()
        };
        let ok = spawn(Router::new().route(
            "/api/test-ai-model",
            post(|| async { Json(json!({ "success": true, "message": "fine" })) }),
        ))
        .await;
        client(&ok).test_model(&settings).await.unwrap();

        let flagged = spawn(Router::new().route(
            "/api/test-ai-model",
            post(|| async { Json(json!({ "success": false, "error": "model not found" })) }),
        ))
        .await;
        let err = client(&flagged).test_model(&settings).await.unwrap_err();
        assert_eq!(err.to_string(), "model not found");

        let down = spawn(Router::new().route(
            "/api/test-ai-model",
            post(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "success": false, "error": "backend server connection failed" })),
                )
            }),
        ))
        .await;
        let err = client(&down).test_model(&settings).await.unwrap_err();
        assert_eq!(err.to_string(), "model connection failed: backend server connection failed");
    }

    #[tokio::test]
    async fn model_test_requires_api_key() {
        let base = spawn(Router::new().route("/api/health", get(|| async { "ok" }))).await;
        let err = client(&base).test_model(&AiSettings::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }
}
