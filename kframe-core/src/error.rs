//! Error types for KFrame operations

use crate::{Chapter, FrameVersion};
use thiserror::Error;

/// Errors raised while talking to a frame source or its transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Empty upstream result: no usable frame version")]
    EmptyUpstreamResult,

    #[error("Upstream transport failed with status {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("Source for node {node} failed: {reason}")]
    Source { node: String, reason: String },
}

/// Frame cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Revalidation of frame {version} was uncertain: {reason}")]
    RevalidationUncertain { version: FrameVersion, reason: String },

    #[error("Build of frame {version} was cancelled")]
    BuildCancelled { version: FrameVersion },

    #[error("Revalidation gate closed")]
    GateClosed,
}

/// Wire shape errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("Malformed value for chapter {chapter}: {reason}")]
    MalformedChapterValue { chapter: Chapter, reason: String },

    #[error("Frame entry is missing its frame version")]
    MissingFrame,

    #[error("Invalid frame shape: {reason}")]
    InvalidShape { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all KFrame errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl FrameError {
    /// True when the failure came from a cancelled build or fetch.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FrameError::Cache(CacheError::BuildCancelled { .. }))
    }
}

/// Result type alias for KFrame operations.
pub type FrameResult<T> = Result<T, FrameError>;

// =============================================================================
// TESTS
// =============================================================================
