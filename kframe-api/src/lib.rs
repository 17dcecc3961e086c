//! KFrame API - HTTP frame endpoint
//!
//! Serves the i-frame and p-frames of a [`FrameRepository`] under a
//! configurable base path, answers conditional requests from the cache, and
//! exposes the administrative source calls.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod trace;

use axum::{
    http::{header, Method},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kframe_storage::FrameRepository;

pub use config::{ApiConfig, LogFormat, DEFAULT_BASE_PATH};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use state::AppState;
pub use telemetry::init_tracing;
pub use trace::{content_size, FrameTrace, TraceAction, TraceMethod};

/// Build the complete router: frame routes under the base path, a 404
/// fallback, request tracing and, when enabled, permissive CORS.
pub fn create_app(repository: FrameRepository, config: ApiConfig) -> Router {
    let cors_allow_all = config.cors_allow_all;
    let state = AppState::new(repository, config);

    let frames = routes::create_router();
    let router = if state.config.base_path.is_empty() {
        Router::new().merge(frames)
    } else {
        Router::new().nest(&state.config.base_path, frames)
    };

    let router = router
        .fallback(routes::fallback)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_allow_all {
        router.layer(build_cors_layer())
    } else {
        router
    }
}

/// Any origin may read frames and revalidate them by etag.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::IF_NONE_MATCH, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::ETAG, header::CACHE_CONTROL, header::EXPIRES])
}
