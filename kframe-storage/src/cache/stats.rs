//! Frame cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the index builder and the delta cache.
#[derive(Debug, Default)]
pub struct FrameCacheCounters {
    iframe_builds: AtomicU64,
    pframe_builds: AtomicU64,
    hits: AtomicU64,
    extensions: AtomicU64,
    invalidations: AtomicU64,
    not_modified: AtomicU64,
}

impl FrameCacheCounters {
    pub fn record_iframe_build(&self) {
        self.iframe_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pframe_build(&self) {
        self.pframe_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extension(&self) {
        self.extensions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_modified(&self) {
        self.not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FrameCacheStats {
        FrameCacheStats {
            iframe_builds: self.iframe_builds.load(Ordering::Relaxed),
            pframe_builds: self.pframe_builds.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            extensions: self.extensions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the frame cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCacheStats {
    /// Number of i-frame builds.
    pub iframe_builds: u64,
    /// Number of p-frame builds.
    pub pframe_builds: u64,
    /// Number of reads served from a cached entry.
    pub hits: u64,
    /// Number of quiet p-frame extensions.
    pub extensions: u64,
    /// Number of p-frame entries dropped on expiry.
    pub invalidations: u64,
    /// Number of conditional requests answered without a build.
    pub not_modified: u64,
}

impl FrameCacheStats {
    /// Total builds across both tiers.
    pub fn builds(&self) -> u64 {
        self.iframe_builds + self.pframe_builds
    }

    /// Hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.builds();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
