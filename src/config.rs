//! Runtime configuration, loaded once at startup from the environment.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_DATA_DIR: &str = ".corncare";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the advisory backend, without a trailing slash.
    pub backend_url: String,
    /// Listen address of the forwarding server.
    pub bind: String,
    /// Where the persisted client store lives.
    pub data_dir: PathBuf,
    /// Timeout applied to every outbound backend call.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            bind: DEFAULT_BIND.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Accepts absolute http(s) URLs only.
fn parse_backend(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            Some(trimmed.trim_end_matches('/').to_string())
        }
        Ok(url) => {
            warn!(scheme = url.scheme(), "BACKEND_URL must be http or https, using default");
            None
        }
        Err(e) => {
            warn!(error = %e, "BACKEND_URL is not a valid URL, using default");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            backend_url: non_empty("BACKEND_URL")
                .and_then(|raw| parse_backend(&raw))
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            bind: non_empty("CORNCARE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            data_dir: non_empty("CORNCARE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            request_timeout: Duration::from_secs(
                non_empty("CORNCARE_TIMEOUT_SECS")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
        }
    }

    pub fn with_backend(mut self, backend_url: impl Into<String>) -> Self {
        self.backend_url = backend_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `path` must start with `/`.
    pub fn backend_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.backend_url, path)
    }
}
