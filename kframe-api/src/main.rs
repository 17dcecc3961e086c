//! KFrame API Server Entry Point
//!
//! Loads configuration, seeds the in-memory frame source, and serves the
//! frame routes until interrupted.

use std::sync::Arc;

use kframe_api::{create_app, init_tracing, ApiConfig, ApiError, ApiResult};
use kframe_storage::{FrameNode, FrameRepository, FrameSource, InMemoryFrameSource};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = ApiConfig::from_env();
    init_tracing(config.log_format)?;

    let source = Arc::new(InMemoryFrameSource::new("memory"));
    if let Some(path) = &config.seed_path {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            ApiError::invalid_input(format!("Failed to read seed {}: {}", path.display(), e))
        })?;
        let seed: serde_json::Value = serde_json::from_str(&contents).map_err(|e| {
            ApiError::invalid_input(format!("Invalid seed {}: {}", path.display(), e))
        })?;
        let loaded = source.seed(seed).await.map_err(|e| {
            ApiError::invalid_input(format!("Invalid seed {}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), records = loaded, "Seeded frame source");
    }

    let chapters = source.chapters().await;
    let node = FrameNode::new("memory", source as Arc<dyn FrameSource>, chapters);
    let repository = FrameRepository::new(vec![node], config.frame_options())
        .map_err(|e| ApiError::invalid_input(format!("Invalid frame timing: {}", e)))?;

    let addr = config.bind_addr()?;
    let base_path = config.base_path.clone();
    let app = create_app(repository, config);

    tracing::info!(%addr, %base_path, "Starting KFrame API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }
    Ok(())
}
