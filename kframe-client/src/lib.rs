//! KFrame Client - frame consumer
//!
//! Fetches the i-frame and its matching p-frame from a frame endpoint,
//! merges them, and holds the result process-locally. Concurrent callers
//! share one fetch.

pub mod config;
pub mod error;
pub mod pool;
pub mod store;
pub mod transport;

pub use config::{ClientConfig, ConfigError, CONFIG_ENV};
pub use error::ClientError;
pub use pool::{HttpClientPool, KeyedClientPool};
pub use store::ClientFrameStore;
pub use transport::{FrameTransport, HttpTransport};

pub use tokio_util::sync::CancellationToken;
