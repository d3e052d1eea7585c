//! Throwaway HTTP backends for tests.

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::json;

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// Base URL of a port nothing listens on.
pub fn dead_backend() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

async fn echo(req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let seen = |name: axum::http::HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    Response::builder()
        .header("x-seen-method", parts.method.as_str())
        .header("x-seen-content-type", seen(CONTENT_TYPE))
        .header("x-seen-cache-control", seen(CACHE_CONTROL))
        .header("x-seen-path", parts.uri.to_string())
        .header("x-body-len", bytes.len().to_string())
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(bytes))
        .unwrap()
}

/// A backend with the endpoints the forwarding routes talk to.
pub fn backend_router() -> Router {
    Router::new()
        .route("/", get(|| async { "CornCare advisory backend" }))
        .route("/api/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/echo", any(echo))
        .route("/api/query", post(echo))
        .route("/api/auth/*rest", any(echo))
        .route("/bare", get(|| async { Response::new(Body::from("bare")) }))
        .route(
            "/moved",
            get(|| async { (StatusCode::FOUND, [(LOCATION, "/elsewhere")]).into_response() }),
        )
        .route(
            "/teapot",
            any(|| async {
                (
                    StatusCode::IM_A_TEAPOT,
                    [(CONTENT_TYPE, "application/json")],
                    r#"{"error":"short and stout"}"#,
                )
            }),
        )
}

pub async fn spawn_backend() -> String {
    spawn(backend_router()).await
}
