//! Shared application state for the frame router.

use std::sync::Arc;

use axum::extract::FromRef;
use kframe_storage::FrameRepository;

use crate::config::ApiConfig;

#[derive(Clone)]
pub struct AppState {
    pub repository: FrameRepository,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(repository: FrameRepository, config: ApiConfig) -> Self {
        Self {
            repository,
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for FrameRepository {
    fn from_ref(state: &AppState) -> Self {
        state.repository.clone()
    }
}
