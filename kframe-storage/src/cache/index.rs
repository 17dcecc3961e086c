//! I-frame index builder.
//!
//! The i-frame is rebuilt on a plain timer: once built it is served until its
//! absolute expiration, then replaced wholesale on the next request.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use kframe_core::{FrameResult, FrameVersion, IFrameEntry, UpstreamError};

use super::freshness::FrameRead;
use super::stats::FrameCacheCounters;
use crate::source::FrameNode;

/// The i-frame: one entry per node, in node order.
pub type IFrame = Arc<Vec<IFrameEntry>>;

#[derive(Debug, Clone)]
struct CachedIndex {
    entries: IFrame,
    built_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CachedIndex {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

pub struct FrameIndexBuilder {
    nodes: Arc<[FrameNode]>,
    expiration: Duration,
    cached: RwLock<Option<CachedIndex>>,
    build: Mutex<()>,
    counters: Arc<FrameCacheCounters>,
}

impl FrameIndexBuilder {
    pub fn new(
        nodes: Arc<[FrameNode]>,
        expiration: Duration,
        counters: Arc<FrameCacheCounters>,
    ) -> Self {
        Self {
            nodes,
            expiration,
            cached: RwLock::new(None),
            build: Mutex::new(()),
            counters,
        }
    }

    /// Get the i-frame, building it when absent or expired.
    ///
    /// Fails with `EmptyUpstreamResult` when the first node reports a zero
    /// version; that failure is not cached.
    pub async fn get_iframe(&self) -> FrameResult<FrameRead<IFrame>> {
        if let Some(hit) = self.live().await {
            self.counters.record_hit();
            return Ok(FrameRead::from_cache(hit.entries, hit.built_at));
        }

        let _build = self.build.lock().await;
        if let Some(hit) = self.live().await {
            self.counters.record_hit();
            return Ok(FrameRead::from_cache(hit.entries, hit.built_at));
        }

        let mut entries = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.iter() {
            let entry = node.source.get_index(&node.chapters).await.map_err(|err| {
                warn!(node = %node.name, error = %err, "i-frame build failed");
                err
            })?;
            entries.push(entry);
        }

        match entries.first() {
            Some(entry) if !entry.frame.is_zero() => {}
            _ => {
                warn!("i-frame build produced no usable version");
                return Err(UpstreamError::EmptyUpstreamResult.into());
            }
        }

        let built = CachedIndex {
            entries: Arc::new(entries),
            built_at: Utc::now(),
            expires_at: Instant::now() + self.expiration,
        };
        self.counters.record_iframe_build();
        debug!(version = %built.entries[0].frame, nodes = built.entries.len(), "i-frame built");

        *self.cached.write().await = Some(built.clone());
        Ok(FrameRead::from_build(built.entries, built.built_at))
    }

    /// Version of the cached i-frame, if one is live.
    pub async fn current_version(&self) -> Option<FrameVersion> {
        self.live()
            .await
            .and_then(|cached| cached.entries.first().map(|entry| entry.frame))
    }

    /// Drop the cached i-frame.
    pub async fn clear(&self) {
        *self.cached.write().await = None;
    }

    async fn live(&self) -> Option<CachedIndex> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|cached| cached.is_live())
            .cloned()
    }
}
