//! Single-hop request forwarding to the advisory backend.
//!
//! The inbound request is re-issued against a fully-qualified target URL with
//! its method and raw body bytes intact; the backend's status and raw body come
//! back to the caller with permissive CORS headers. A failed outbound call is
//! reported as a 500 JSON envelope, never as an error.

use anyhow::Context;
use axum::body::Body;
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::{redirect, Client};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::models::ProxyFailure;

/// Largest inbound body the forwarder will buffer.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
const DEFAULT_ACCEPT: &str = "*/*";
const DEFAULT_USER_AGENT: &str = "CornCare-Frontend";

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";

/// HTTP client used for every backend call: redirects are handed back to the caller.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .redirect(redirect::Policy::none())
        .timeout(timeout)
        .build()
}

fn carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

fn header_or(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName, default: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub content_type: String,
    pub accept: String,
    pub user_agent: String,
    /// Always `None` for GET and HEAD.
    pub body: Option<Bytes>,
    pub target: String,
}

impl ProxyRequest {
    pub async fn from_request(req: Request<Body>, target: impl Into<String>) -> anyhow::Result<Self> {
        let (parts, body) = req.into_parts();
        let body = if carries_body(&parts.method) {
            Some(
                axum::body::to_bytes(body, MAX_BODY_BYTES)
                    .await
                    .context("failed to read inbound request body")?,
            )
        } else {
            None
        };

        Ok(Self {
            content_type: header_or(&parts.headers, CONTENT_TYPE, DEFAULT_CONTENT_TYPE),
            accept: header_or(&parts.headers, ACCEPT, DEFAULT_ACCEPT),
            user_agent: header_or(&parts.headers, USER_AGENT, DEFAULT_USER_AGENT),
            method: parts.method,
            body,
            target: target.into(),
        })
    }

    pub async fn send(self, client: &Client) -> reqwest::Result<ProxyResponse> {
        let mut outbound = client
            .request(self.method, &self.target)
            .header(CONTENT_TYPE, self.content_type)
            .header(ACCEPT, self.accept)
            .header(USER_AGENT, self.user_agent)
            .header(CACHE_CONTROL, "no-store");
        if let Some(body) = self.body {
            outbound = outbound.body(body);
        }

        let response = outbound.send().await?;
        let status = response.status();
        let content_type = header_or(response.headers(), CONTENT_TYPE, DEFAULT_CONTENT_TYPE);
        let body = response.bytes().await?;

        Ok(ProxyResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            content_type,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub status_text: String,
    pub content_type: String,
    pub body: Bytes,
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        with_cors(Response::builder().status(status))
            .header(CONTENT_TYPE, self.content_type)
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

fn with_cors(builder: axum::http::response::Builder) -> axum::http::response::Builder {
    builder
        .header("access-control-allow-origin", ALLOW_ORIGIN)
        .header("access-control-allow-methods", ALLOW_METHODS)
        .header("access-control-allow-headers", ALLOW_HEADERS)
}

/// Answer to a CORS preflight on a forwarded route.
pub fn preflight() -> Response {
    with_cors(Response::builder().status(StatusCode::NO_CONTENT))
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub fn failure_response(target: &str, message: &str) -> Response {
    let envelope = ProxyFailure {
        error: "proxy request failed".to_string(),
        message: message.to_string(),
        target: target.to_string(),
    };
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    with_cors(Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR))
        .header(CONTENT_TYPE, DEFAULT_CONTENT_TYPE)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Relays `req` to `target` and the backend's answer back; never fails.
pub async fn forward(client: &Client, req: Request<Body>, target: impl Into<String>) -> Response {
    let target = target.into();
    info!(method = %req.method(), %target, "forwarding request");

    let outbound = match ProxyRequest::from_request(req, target.clone()).await {
        Ok(outbound) => outbound,
        Err(e) => {
            warn!(%target, error = %e, "could not read inbound request");
            return failure_response(&target, &format!("{e:#}"));
        }
    };

    match outbound.send(client).await {
        Ok(response) => {
            info!(status = response.status, reason = %response.status_text, %target, "backend responded");
            response.into_response()
        }
        Err(e) => {
            error!(%target, error = %e, "proxy request failed");
            failure_response(&target, &e.to_string())
        }
    }
}
