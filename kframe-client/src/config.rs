//! Client configuration.
//!
//! Loaded from the TOML file named by `KFRAME_CLIENT_CONFIG`, or defaults
//! when the variable is unset.

use serde::Deserialize;
use std::path::Path;

use kframe_core::FrameVersion;

use crate::error::ClientError;

/// Environment variable naming the client config file.
pub const CONFIG_ENV: &str = "KFRAME_CLIENT_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClientConfig {
    /// Origin prepended to relative frame paths, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Frame endpoint, relative to `base_url` or absolute.
    pub frame_url: String,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            frame_url: "/@frame".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_path(Path::new(&path))?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn with_frame_url(mut self, frame_url: impl Into<String>) -> Self {
        self.frame_url = frame_url.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "frame_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if !self.is_absolute() && self.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "base_url",
                reason: "required when frame_url is relative".to_string(),
            });
        }
        Ok(())
    }

    fn is_absolute(&self) -> bool {
        self.frame_url.starts_with("http://") || self.frame_url.starts_with("https://")
    }

    /// Frame endpoint without a trailing slash.
    pub fn frame_url(&self) -> &str {
        self.frame_url.trim_end_matches('/')
    }

    pub fn iframe_path(&self) -> String {
        format!("{}/i", self.frame_url())
    }

    pub fn pframe_path(&self, version: FrameVersion) -> String {
        format!("{}/p/{}", self.frame_url(), version)
    }

    /// Absolute URL for a path produced by [`iframe_path`](Self::iframe_path)
    /// or [`pframe_path`](Self::pframe_path).
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.iframe_path(), "/@frame/i");
        assert_eq!(config.pframe_path(FrameVersion::new(42)), "/@frame/p/42");
        assert_eq!(config.resolve("/@frame/i"), "http://localhost:8080/@frame/i");
    }

    #[test]
    fn test_custom_absolute_url() {
        let config = ClientConfig::default().with_frame_url("https://assist.example.com/@frame/");
        assert_eq!(config.iframe_path(), "https://assist.example.com/@frame/i");
        assert_eq!(
            config.resolve(&config.iframe_path()),
            "https://assist.example.com/@frame/i"
        );
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ClientConfig::from_toml_str("frame_url = \"/frames\"\n").unwrap();
        assert_eq!(config.frame_url, "/frames");
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            ClientConfig::from_toml_str("frameUrl = \"/x\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ClientConfig {
            request_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "request_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url = \"http://frames:9000\"").unwrap();
        writeln!(file, "request_timeout_ms = 500").unwrap();
        let config = ClientConfig::from_path(file.path()).unwrap();
        assert_eq!(config.base_url, "http://frames:9000");
        assert_eq!(config.request_timeout_ms, 500);
    }
}
