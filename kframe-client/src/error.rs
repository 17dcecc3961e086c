//! Client error type.

use kframe_core::{FrameError, UpstreamError};

/// Errors surfaced by the frame client.
///
/// Every variant is cloneable so one fetch outcome can be handed to every
/// coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Upstream transport failed with status {status}: {body}")]
    Transport { status: u16, body: String },
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("Frame fetch cancelled")]
    Cancelled,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("Config error: {0}")]
    Config(String),
}

impl ClientError {
    /// HTTP status of a failed transport call.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

impl From<UpstreamError> for ClientError {
    fn from(err: UpstreamError) -> Self {
        ClientError::Frame(err.into())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ClientError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => ClientError::Transport {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => ClientError::Request(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}
