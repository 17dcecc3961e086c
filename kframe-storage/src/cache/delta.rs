//! P-frame delta cache with quiet revalidation.
//!
//! Entries are keyed by [`FrameVersion`]. Builds and revalidations run under
//! the [`RevalidationGate`]; reads never do. When an entry reaches its TTL a
//! scheduled task evicts it and, if the version is still the live i-frame
//! version, recomputes every node's [`FrameCheck`]. Unchanged checks put the
//! same payload and etag back with the polling TTL. Anything else leaves the
//! entry absent so the next read rebuilds it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kframe_core::{
    CacheError, FrameCheck, FrameResult, FrameTiming, FrameVersion, PFrameEntry, UpstreamError,
};

use super::freshness::{composite_etag, FrameRead};
use super::gate::RevalidationGate;
use super::index::FrameIndexBuilder;
use super::stats::FrameCacheCounters;
use crate::source::FrameNode;

/// A built p-frame: one entry per node plus its composite etag.
#[derive(Debug, Clone, PartialEq)]
pub struct PFrame {
    pub entries: Arc<Vec<PFrameEntry>>,
    pub etag: String,
}

#[derive(Debug, Clone)]
struct DeltaSlot {
    frame: PFrame,
    checks: Arc<Vec<FrameCheck>>,
    built_at: DateTime<Utc>,
    expires_at: Instant,
    generation: u64,
}

impl DeltaSlot {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

struct DeltaState {
    nodes: Arc<[FrameNode]>,
    index: Arc<FrameIndexBuilder>,
    timing: FrameTiming,
    gate: RevalidationGate,
    entries: DashMap<FrameVersion, DeltaSlot>,
    generation: AtomicU64,
    counters: Arc<FrameCacheCounters>,
}

/// Outcome of one revalidation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidation {
    /// Replaced or cleared before it expired.
    Superseded,
    /// Not the live i-frame version any more.
    Retired,
    /// Rebuilt by a reader while waiting for the gate.
    Rebuilt,
    /// Checks unchanged; re-inserted with the polling TTL.
    Extended,
    /// Checks changed or could not be compared.
    Invalidated,
}

#[derive(Clone)]
pub struct FrameDeltaCache {
    state: Arc<DeltaState>,
}

impl FrameDeltaCache {
    pub fn new(
        nodes: Arc<[FrameNode]>,
        index: Arc<FrameIndexBuilder>,
        timing: FrameTiming,
        counters: Arc<FrameCacheCounters>,
    ) -> Self {
        Self {
            state: Arc::new(DeltaState {
                nodes,
                index,
                timing,
                gate: RevalidationGate::new(),
                entries: DashMap::new(),
                generation: AtomicU64::new(0),
                counters,
            }),
        }
    }

    /// Get the p-frame for `version`, building it on a miss.
    ///
    /// Dropping the returned future mid-build leaves nothing cached.
    pub async fn get_pframe(&self, version: FrameVersion) -> FrameResult<FrameRead<PFrame>> {
        let state = &self.state;
        if let Some(hit) = state.lookup(version) {
            return Ok(hit);
        }

        // Readers holding a live entry go first.
        if !state.timing.build_delay.is_zero() {
            tokio::time::sleep(state.timing.build_delay).await;
        }
        let _permit = state.gate.acquire().await?;
        if let Some(hit) = state.lookup(version) {
            return Ok(hit);
        }

        if state.nodes.is_empty() {
            return Err(UpstreamError::EmptyUpstreamResult.into());
        }

        let mut entries = Vec::with_capacity(state.nodes.len());
        let mut checks = Vec::with_capacity(state.nodes.len());
        let mut etags = Vec::with_capacity(state.nodes.len());
        for node in state.nodes.iter() {
            let build = node
                .source
                .get_delta(&node.chapters, version, true)
                .await
                .map_err(|err| {
                    warn!(node = %node.name, %version, error = %err, "p-frame build failed");
                    err
                })?;
            entries.push(build.entry);
            checks.push(build.check);
            etags.push(build.etag);
        }

        let frame = PFrame {
            entries: Arc::new(entries),
            etag: composite_etag(&etags),
        };
        let built_at = Utc::now();
        state.counters.record_pframe_build();
        info!(%version, etag = %frame.etag, "p-frame built");

        DeltaState::insert(
            state,
            version,
            frame.clone(),
            Arc::new(checks),
            built_at,
            state.timing.pframe_expiration,
        );
        Ok(FrameRead::from_build(frame, built_at))
    }

    /// True when a live cached p-frame carries exactly `etag`.
    pub fn has_pframe(&self, etag: &str) -> bool {
        self.state
            .entries
            .iter()
            .any(|slot| slot.is_live() && slot.frame.etag == etag)
    }

    /// Cached p-frame for `version` without building.
    pub fn peek(&self, version: FrameVersion) -> Option<PFrame> {
        self.state
            .entries
            .get(&version)
            .filter(|slot| slot.is_live())
            .map(|slot| slot.frame.clone())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state.entries.iter().filter(|slot| slot.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Pending revalidations find nothing to extend.
    pub fn clear(&self) {
        self.state.entries.clear();
    }

    /// True when no build or revalidation holds the gate.
    pub fn is_idle(&self) -> bool {
        self.state.gate.is_idle()
    }
}

impl DeltaState {
    fn lookup(&self, version: FrameVersion) -> Option<FrameRead<PFrame>> {
        let slot = self.entries.get(&version)?;
        if !slot.is_live() {
            return None;
        }
        self.counters.record_hit();
        Some(FrameRead::from_cache(slot.frame.clone(), slot.built_at))
    }

    fn insert(
        this: &Arc<Self>,
        version: FrameVersion,
        frame: PFrame,
        checks: Arc<Vec<FrameCheck>>,
        built_at: DateTime<Utc>,
        ttl: Duration,
    ) {
        let generation = this.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let expires_at = Instant::now() + ttl;
        this.entries.insert(
            version,
            DeltaSlot {
                frame,
                checks,
                built_at,
                expires_at,
                generation,
            },
        );

        let weak = Arc::downgrade(this);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            if let Some(state) = Weak::upgrade(&weak) {
                let outcome = state.revalidate(version, generation).await;
                debug!(%version, ?outcome, "p-frame expiry handled");
            }
        });
    }

    /// Evict the expired entry, then decide under the gate whether it comes
    /// back.
    async fn revalidate(self: &Arc<Self>, version: FrameVersion, generation: u64) -> Revalidation {
        let Some((_, slot)) = self
            .entries
            .remove_if(&version, |_, slot| slot.generation == generation)
        else {
            return Revalidation::Superseded;
        };

        if self.index.current_version().await != Some(version) {
            self.counters.record_invalidation();
            return Revalidation::Retired;
        }

        let Ok(_permit) = self.gate.acquire().await else {
            self.counters.record_invalidation();
            return Revalidation::Invalidated;
        };
        if self.entries.contains_key(&version) {
            return Revalidation::Rebuilt;
        }

        match self.checks_unchanged(version, &slot.checks).await {
            Ok(true) => {
                self.counters.record_extension();
                info!(%version, etag = %slot.frame.etag, "p-frame extended");
                Self::insert(
                    self,
                    version,
                    slot.frame,
                    slot.checks,
                    slot.built_at,
                    self.timing.pframe_polling,
                );
                Revalidation::Extended
            }
            Ok(false) => {
                self.counters.record_invalidation();
                info!(%version, "p-frame changed; dropped");
                Revalidation::Invalidated
            }
            Err(err) => {
                self.counters.record_invalidation();
                warn!(%version, error = %err, "p-frame revalidation uncertain; dropped");
                Revalidation::Invalidated
            }
        }
    }

    async fn checks_unchanged(
        &self,
        version: FrameVersion,
        previous: &[FrameCheck],
    ) -> FrameResult<bool> {
        if previous.len() != self.nodes.len() {
            return Err(CacheError::RevalidationUncertain {
                version,
                reason: format!(
                    "{} checks recorded for {} nodes",
                    previous.len(),
                    self.nodes.len()
                ),
            }
            .into());
        }

        for (node, prev) in self.nodes.iter().zip(previous) {
            let current = node
                .source
                .get_delta(&node.chapters, prev.frame, false)
                .await
                .map_err(|err| CacheError::RevalidationUncertain {
                    version,
                    reason: format!("node {}: {}", node.name, err),
                })?;
            if current.check != *prev {
                debug!(%version, node = %node.name, "frame check differs");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DeltaBuild, FrameSource};
    use async_trait::async_trait;
    use kframe_core::{Chapter, FrameError, IFrameEntry, KeyedRecord};
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize};

    /// Source whose check and etag are driven by a `revision` counter.
    struct ScriptedSource {
        version: i64,
        revision: AtomicI64,
        full_builds: AtomicUsize,
        checks: AtomicUsize,
        fail_checks: AtomicBool,
        /// Held by a test to park full builds.
        builds: tokio::sync::Mutex<()>,
    }

    impl ScriptedSource {
        fn new(version: i64) -> Arc<Self> {
            Arc::new(Self {
                version,
                revision: AtomicI64::new(1),
                full_builds: AtomicUsize::new(0),
                checks: AtomicUsize::new(0),
                fail_checks: AtomicBool::new(false),
                builds: tokio::sync::Mutex::new(()),
            })
        }

        fn full_builds(&self) -> usize {
            self.full_builds.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn get_index(&self, _: &[Chapter]) -> FrameResult<IFrameEntry> {
            Ok(IFrameEntry::new(FrameVersion::new(self.version)))
        }

        async fn get_delta(
            &self,
            chapters: &[Chapter],
            since: FrameVersion,
            full_rebuild: bool,
        ) -> FrameResult<DeltaBuild> {
            if !full_rebuild {
                let revision = self.revision.load(Ordering::SeqCst);
                let check = FrameCheck::new(since, vec![revision], None);
                self.checks.fetch_add(1, Ordering::SeqCst);
                if self.fail_checks.load(Ordering::SeqCst) {
                    return Err(UpstreamError::Source {
                        node: "db".to_string(),
                        reason: "offline".to_string(),
                    }
                    .into());
                }
                return Ok(DeltaBuild { check, ..Default::default() });
            }
            let _parked = self.builds.lock().await;
            self.full_builds.fetch_add(1, Ordering::SeqCst);
            let revision = self.revision.load(Ordering::SeqCst);
            let check = FrameCheck::new(since, vec![revision], None);
            let mut entry = PFrameEntry::new(since);
            for chapter in chapters {
                entry = entry.with_chapter(chapter.clone(), vec![KeyedRecord::new(revision)]);
            }
            Ok(DeltaBuild {
                entry,
                check,
                etag: format!("r{}", revision),
            })
        }

        async fn clear(&self, _: &[Chapter]) -> FrameResult<String> {
            Ok(String::new())
        }

        async fn install(&self, _: &[Chapter]) -> FrameResult<String> {
            Ok(String::new())
        }

        async fn uninstall(&self, _: &[Chapter]) -> FrameResult<String> {
            Ok(String::new())
        }
    }

    struct Fixture {
        source: Arc<ScriptedSource>,
        index: Arc<FrameIndexBuilder>,
        cache: FrameDeltaCache,
        counters: Arc<FrameCacheCounters>,
    }

    fn timing() -> FrameTiming {
        FrameTiming::new()
            .with_iframe_expiration(Duration::from_secs(3600))
            .with_pframe_expiration(Duration::from_secs(60))
            .with_pframe_polling(Duration::from_secs(20))
    }

    fn fixture(version: i64) -> Fixture {
        let source = ScriptedSource::new(version);
        let nodes: Arc<[FrameNode]> = Arc::from(vec![FrameNode::new(
            "db",
            Arc::clone(&source) as Arc<dyn FrameSource>,
            ["articles"],
        )]);
        let counters = Arc::new(FrameCacheCounters::default());
        let timing = timing();
        let index = Arc::new(FrameIndexBuilder::new(
            Arc::clone(&nodes),
            timing.iframe_expiration,
            Arc::clone(&counters),
        ));
        let cache = FrameDeltaCache::new(nodes, Arc::clone(&index), timing, Arc::clone(&counters));
        Fixture {
            source,
            index,
            cache,
            counters,
        }
    }

    /// Let spawned revalidation tasks run to completion.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_then_hit() {
        let f = fixture(10);
        let v = FrameVersion::new(10);

        let first = f.cache.get_pframe(v).await.unwrap();
        assert!(first.was_built());
        assert_eq!(first.value().etag, "\"r1\"");

        let second = f.cache.get_pframe(v).await.unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.value(), first.value());
        assert_eq!(f.source.full_builds(), 1);
        assert!(f.cache.has_pframe("\"r1\""));
        assert!(!f.cache.has_pframe("\"r2\""));
        assert_eq!(f.counters.snapshot().not_modified, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_build_once() {
        let f = fixture(10);
        let v = FrameVersion::new(10);

        let reads = futures_join(&f.cache, v, 8).await;
        assert!(reads.iter().all(|r| r.value().etag == "\"r1\""));
        assert_eq!(reads.iter().filter(|r| r.was_built()).count(), 1);
        assert_eq!(f.source.full_builds(), 1);
        assert!(f.cache.is_idle());
    }

    async fn futures_join(cache: &FrameDeltaCache, v: FrameVersion, n: usize) -> Vec<FrameRead<PFrame>> {
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_pframe(v).await })
            })
            .collect();
        let mut reads = Vec::with_capacity(n);
        for handle in handles {
            reads.push(handle.await.unwrap().unwrap());
        }
        reads
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_checks_extend_with_same_etag() {
        let f = fixture(10);
        let v = FrameVersion::new(10);
        f.index.get_iframe().await.unwrap();
        f.cache.get_pframe(v).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;

        assert_eq!(f.counters.snapshot().extensions, 1);
        assert_eq!(f.cache.peek(v).map(|p| p.etag), Some("\"r1\"".to_string()));
        let read = f.cache.get_pframe(v).await.unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(f.source.full_builds(), 1);

        // Extended entries live for the polling TTL, then revalidate again.
        tokio::time::advance(Duration::from_secs(21)).await;
        settle().await;
        assert_eq!(f.counters.snapshot().extensions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_checks_invalidate() {
        let f = fixture(10);
        let v = FrameVersion::new(10);
        f.index.get_iframe().await.unwrap();
        f.cache.get_pframe(v).await.unwrap();

        f.source.revision.store(2, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;

        assert!(f.cache.peek(v).is_none());
        assert_eq!(f.counters.snapshot().invalidations, 1);

        let rebuilt = f.cache.get_pframe(v).await.unwrap();
        assert!(rebuilt.was_built());
        assert_eq!(rebuilt.value().etag, "\"r2\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_holding_gate_wins_over_revalidation() {
        let f = fixture(10);
        let v = FrameVersion::new(10);
        f.index.get_iframe().await.unwrap();
        f.cache.get_pframe(v).await.unwrap();
        let generation = f.cache.state.entries.get(&v).unwrap().generation;

        // Expired for readers, eviction not delivered yet.
        f.cache.state.entries.get_mut(&v).unwrap().expires_at = Instant::now();
        f.source.revision.store(2, Ordering::SeqCst);
        let parked = f.source.builds.lock().await;

        let reader = {
            let cache = f.cache.clone();
            tokio::spawn(async move { cache.get_pframe(v).await })
        };
        settle().await;
        // Still inside the build delay: the gate is untouched.
        assert!(f.cache.is_idle());

        tokio::time::advance(Duration::from_millis(5)).await;
        settle().await;
        assert!(!f.cache.is_idle());

        let revalidation = {
            let state = Arc::clone(&f.cache.state);
            tokio::spawn(async move { state.revalidate(v, generation).await })
        };
        settle().await;
        assert!(f.cache.peek(v).is_none());

        drop(parked);
        let rebuilt = reader.await.unwrap().unwrap();
        assert_eq!(revalidation.await.unwrap(), Revalidation::Rebuilt);

        assert!(rebuilt.was_built());
        assert_eq!(rebuilt.value().etag, "\"r2\"");
        assert_eq!(f.cache.peek(v).map(|p| p.etag), Some("\"r2\"".to_string()));
        assert_eq!(f.source.full_builds(), 2);
        assert_eq!(f.source.checks.load(Ordering::SeqCst), 0);
        let stats = f.counters.snapshot();
        assert_eq!(stats.extensions, 0);
        assert_eq!(stats.invalidations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_check_invalidates() {
        let f = fixture(10);
        let v = FrameVersion::new(10);
        f.index.get_iframe().await.unwrap();
        f.cache.get_pframe(v).await.unwrap();

        f.source.fail_checks.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;

        assert!(f.cache.peek(v).is_none());
        assert_eq!(f.counters.snapshot().extensions, 0);
        assert_eq!(f.counters.snapshot().invalidations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_version_is_retired_without_checks() {
        let f = fixture(10);
        // No i-frame cached, so version 10 is not live.
        f.cache.get_pframe(FrameVersion::new(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;

        assert!(f.cache.is_empty());
        assert_eq!(f.source.checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_entries() {
        let f = fixture(10);
        let v = FrameVersion::new(10);
        f.cache.get_pframe(v).await.unwrap();
        f.cache.clear();
        assert!(!f.cache.has_pframe("\"r1\""));

        let read = f.cache.get_pframe(v).await.unwrap();
        assert!(read.was_built());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_build_leaves_nothing() {
        let f = fixture(10);
        let v = FrameVersion::new(10);

        let pending = tokio::time::timeout(Duration::from_millis(1), f.cache.get_pframe(v)).await;
        assert!(pending.is_err());
        assert!(f.cache.peek(v).is_none());
        assert!(f.cache.is_idle());
    }

    #[tokio::test]
    async fn test_no_nodes_is_empty_upstream() {
        let counters = Arc::new(FrameCacheCounters::default());
        let nodes: Arc<[FrameNode]> = Arc::from(Vec::new());
        let index = Arc::new(FrameIndexBuilder::new(
            Arc::clone(&nodes),
            Duration::from_secs(60),
            Arc::clone(&counters),
        ));
        let cache = FrameDeltaCache::new(nodes, index, timing(), counters);
        let err = cache.get_pframe(FrameVersion::new(1)).await.unwrap_err();
        assert_eq!(err, FrameError::from(UpstreamError::EmptyUpstreamResult));
    }
}
