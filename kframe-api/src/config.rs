//! API Configuration Module
//!
//! Server settings loaded from environment variables, with defaults that
//! run a local frame endpoint out of the box.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use kframe_core::FrameTiming;
use kframe_storage::FrameOptions;

use crate::error::{ApiError, ApiResult};

pub const DEFAULT_BASE_PATH: &str = "/@frame";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Path prefix of every frame route, normalised to `/segment` form.
    pub base_path: String,
    /// Shared secret for administrative routes. `None` leaves them open.
    pub access_token: Option<String>,
    pub bind_host: String,
    pub port: u16,
    /// JSON document loaded into the in-memory source at startup.
    pub seed_path: Option<PathBuf>,
    pub timing: FrameTiming,
    /// Answer every origin with `Access-Control-Allow-Origin: *`.
    pub cors_allow_all: bool,
    pub log_format: LogFormat,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            access_token: None,
            bind_host: "0.0.0.0".to_string(),
            port: 8080,
            seed_path: None,
            timing: FrameTiming::default(),
            cors_allow_all: true,
            log_format: LogFormat::default(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `KFRAME_BASE_PATH`: route prefix (default: `/@frame`)
    /// - `KFRAME_ACCESS_TOKEN`: admin access token (default: none)
    /// - `KFRAME_BIND`: bind host (default: `0.0.0.0`)
    /// - `KFRAME_PORT` or `PORT`: listen port (default: 8080)
    /// - `KFRAME_SEED_PATH`: JSON seed for the in-memory source
    /// - `KFRAME_IFRAME_EXPIRATION_SECS`: i-frame lifetime, also its max-age
    /// - `KFRAME_PFRAME_EXPIRATION_SECS`: p-frame lifetime after a build
    /// - `KFRAME_PFRAME_POLLING_SECS`: p-frame lifetime after an extension
    /// - `KFRAME_CORS_ALLOW_ALL`: "true" or "false" (default: true)
    /// - `KFRAME_LOG_FORMAT`: "json" or "pretty" (default: json)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        let mut timing = defaults.timing.clone();
        if let Some(expiration) = secs("KFRAME_IFRAME_EXPIRATION_SECS") {
            timing = timing
                .with_iframe_expiration(expiration)
                .with_iframe_max_age(expiration);
        }
        if let Some(expiration) = secs("KFRAME_PFRAME_EXPIRATION_SECS") {
            timing = timing.with_pframe_expiration(expiration);
        }
        if let Some(polling) = secs("KFRAME_PFRAME_POLLING_SECS") {
            timing = timing.with_pframe_polling(polling);
        }

        let port = lookup("KFRAME_PORT")
            .or_else(|| lookup("PORT"))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.port);

        Self {
            base_path: lookup("KFRAME_BASE_PATH")
                .map(|s| normalize_base_path(&s))
                .unwrap_or(defaults.base_path),
            access_token: lookup("KFRAME_ACCESS_TOKEN").filter(|s| !s.is_empty()),
            bind_host: lookup("KFRAME_BIND").unwrap_or(defaults.bind_host),
            port,
            seed_path: lookup("KFRAME_SEED_PATH")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            timing,
            cors_allow_all: lookup("KFRAME_CORS_ALLOW_ALL")
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.cors_allow_all),
            log_format: lookup("KFRAME_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.log_format),
        }
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_base_path(base_path);
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_timing(mut self, timing: FrameTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Repository options derived from this configuration.
    pub fn frame_options(&self) -> FrameOptions {
        let options = FrameOptions::new().with_timing(self.timing.clone());
        match &self.access_token {
            Some(token) => options.with_access_token(token.clone()),
            None => options,
        }
    }

    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>().map_err(|e| {
            ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
        })
    }
}

/// `"@frame/"` becomes `"/@frame"`; an empty or `/` prefix becomes `""`.
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
