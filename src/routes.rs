use anyhow::Context;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::future;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::forwarder::{self, MAX_BODY_BYTES};
use crate::models::{AiSettings, DebugReport, EndpointProbe, ModelTestReport};
use crate::state::AppState;
use crate::storage;

const SNIPPET_CHARS: usize = 200;
const PROBE_USER_AGENT: &str = "CornCare-Test";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/auth/*rest",
            get(auth_proxy)
                .post(auth_proxy)
                .put(auth_proxy)
                .delete(auth_proxy)
                .patch(auth_proxy)
                .options(preflight),
        )
        .route("/api/query", post(query_proxy).options(preflight))
        .route("/api/test-ai-model", post(test_ai_model))
        .route("/api/debug", get(debug_probe))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config)?;
    let bind = state.config().bind.clone();
    let backend = state.config().backend_url.clone();

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, %backend, "forwarding server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    info!("forwarding server shut down");
    Ok(())
}

async fn preflight() -> Response {
    forwarder::preflight()
}

async fn auth_proxy(State(state): State<AppState>, Path(rest): Path<String>, req: Request<Body>) -> Response {
    let mut target = state.config().backend_endpoint(&format!("/api/auth/{rest}"));
    if let Some(query) = req.uri().query() {
        target.push('?');
        target.push_str(query);
    }
    forwarder::forward(state.client(), req, target).await
}

async fn query_proxy(State(state): State<AppState>, req: Request<Body>) -> Response {
    let target = state.config().backend_endpoint("/api/query");
    forwarder::forward(state.client(), req, target).await
}

/// Connectivity probe against the backend health endpoint.
async fn test_ai_model(State(state): State<AppState>, body: Bytes) -> Response {
    match serde_json::from_slice::<AiSettings>(&body) {
        Ok(settings) => info!(
            sdk = %settings.sdk,
            model = %settings.model_name,
            api_key = %settings.masked_api_key(),
            "testing backend connectivity"
        ),
        Err(e) => debug!(error = %e, "model test without readable settings"),
    }

    let backend_url = state.config().backend_url.clone();
    let health = state.config().backend_endpoint("/api/health");
    let outcome = async {
        let response = state
            .client()
            .get(&health)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, PROBE_USER_AGENT)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        Ok::<_, reqwest::Error>((status, text))
    }
    .await;

    match outcome {
        Ok((status, text)) if status.is_success() => {
            let response = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
            Json(ModelTestReport {
                success: true,
                message: Some("backend connection is healthy".to_string()),
                error: None,
                status: None,
                response: Some(response),
                backend_url: Some(backend_url),
            })
            .into_response()
        }
        Ok((status, text)) => {
            warn!(status = status.as_u16(), "backend health check failed");
            (
                status,
                Json(ModelTestReport {
                    success: false,
                    message: None,
                    error: Some("backend server connection failed".to_string()),
                    status: Some(status.as_u16()),
                    response: Some(Value::String(text)),
                    backend_url: None,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, %health, "backend unreachable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ModelTestReport {
                    success: false,
                    message: None,
                    error: Some(format!("connection failed: {e}")),
                    status: None,
                    response: None,
                    backend_url: Some(backend_url),
                }),
            )
                .into_response()
        }
    }
}

async fn probe(client: &Client, url: &str) -> reqwest::Result<EndpointProbe> {
    let response = client.get(url).send().await?;
    let status = response.status().as_u16();
    let text = response.text().await?;
    Ok(EndpointProbe {
        status,
        response: text.chars().take(SNIPPET_CHARS).collect(),
    })
}

async fn debug_probe(State(state): State<AppState>) -> Response {
    let backend_url = state.config().backend_url.clone();
    let root = state.config().backend_endpoint("/");
    let health = state.config().backend_endpoint("/api/health");

    match future::join(probe(state.client(), &root), probe(state.client(), &health)).await {
        (Ok(root_endpoint), Ok(health_endpoint)) => Json(DebugReport {
            backend_url,
            root_endpoint,
            health_endpoint,
            timestamp: storage::now(),
        })
        .into_response(),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, %backend_url, "debug probe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "debug probe failed",
                    "message": e.to_string(),
                    "backend_url": backend_url,
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dead_backend, spawn, spawn_backend};

    async fn spawn_forwarder(backend: &str) -> String {
        let state = AppState::new(Config::default().with_backend(backend)).unwrap();
        spawn(router(state)).await
    }

    #[tokio::test]
    async fn auth_passthrough_keeps_method_path_and_query() {
        let forwarder = spawn_forwarder(&spawn_backend().await).await;
        let response = reqwest::Client::new()
            .put(format!("{forwarder}/api/auth/profile/avatar?lang=zh"))
            .header(CONTENT_TYPE, "application/json")
            .body(r#"{"name":"expert"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-seen-method"], "PUT");
        assert_eq!(response.headers()["x-seen-path"], "/api/auth/profile/avatar?lang=zh");
        assert_eq!(response.text().await.unwrap(), r#"{"name":"expert"}"#);
    }

    #[tokio::test]
    async fn query_passthrough_relays_multipart() {
        let forwarder = spawn_forwarder(&spawn_backend().await).await;
        let form = reqwest::multipart::Form::new()
            .text("messages", r#"[{"role":"user","content":"hi"}]"#)
            .part("image", reqwest::multipart::Part::bytes(vec![0xff, 0x00, 0xd8]).file_name("leaf.jpg"));
        let response = reqwest::Client::new()
            .post(format!("{forwarder}/api/query"))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(response.headers()["x-seen-content-type"]
            .to_str()
            .unwrap()
            .starts_with("multipart/form-data; boundary="));
        let body = response.bytes().await.unwrap();
        assert!(body.windows(3).any(|w| w == [0xff, 0x00, 0xd8]));
    }

    #[tokio::test]
    async fn preflight_is_answered_locally() {
        let forwarder = spawn_forwarder(&dead_backend()).await;
        let response = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("{forwarder}/api/query"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn model_test_reports_healthy_backend() {
        let forwarder = spawn_forwarder(&spawn_backend().await).await;
        let report: Value = reqwest::Client::new()
            .post(format!("{forwarder}/api/test-ai-model"))
            .json(&AiSettings::default())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(report["success"], true);
        assert_eq!(report["response"]["status"], "ok");
    }

    #[tokio::test]
    async fn model_test_relays_backend_status() {
        let backend = spawn(
            Router::new().route(
                "/api/health",
                get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
            ),
        )
        .await;
        let forwarder = spawn_forwarder(&backend).await;
        let response = reqwest::Client::new()
            .post(format!("{forwarder}/api/test-ai-model"))
            .body("not settings")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 503);
        let report: Value = response.json().await.unwrap();
        assert_eq!(report["success"], false);
        assert_eq!(report["status"], 503);
        assert_eq!(report["response"], "maintenance");
    }

    #[tokio::test]
    async fn model_test_against_dead_backend_is_500() {
        let forwarder = spawn_forwarder(&dead_backend()).await;
        let response = reqwest::Client::new()
            .post(format!("{forwarder}/api/test-ai-model"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        let report: Value = response.json().await.unwrap();
        assert_eq!(report["success"], false);
        assert!(report["error"].as_str().unwrap().starts_with("connection failed"));
    }

    #[tokio::test]
    async fn debug_probe_truncates_snippets() {
        let backend = spawn(
            Router::new()
                .route("/", get(|| async { "x".repeat(500) }))
                .route("/api/health", get(|| async { Json(json!({ "status": "ok" })) })),
        )
        .await;
        let forwarder = spawn_forwarder(&backend).await;
        let report: Value = reqwest::get(format!("{forwarder}/api/debug"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(report["backend_url"], backend);
        assert_eq!(report["root_endpoint"]["status"], 200);
        assert_eq!(report["root_endpoint"]["response"].as_str().unwrap().len(), SNIPPET_CHARS);
        assert_eq!(report["health_endpoint"]["response"], r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn debug_probe_against_dead_backend_is_500() {
        let backend = dead_backend();
        let forwarder = spawn_forwarder(&backend).await;
        let response = reqwest::get(format!("{forwarder}/api/debug")).await.unwrap();
        assert_eq!(response.status(), 500);
        let report: Value = response.json().await.unwrap();
        assert_eq!(report["backend_url"], backend);
    }
}
