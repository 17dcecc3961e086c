//! Freshness tokens and read metadata.
//!
//! The p-frame etag is a composite of the per-node etags produced during a
//! build. The i-frame uses a constant etag: its identity is its expiration
//! window, not its content.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Etag served with every i-frame.
pub const IFRAME_ETAG: &str = "\"iframe\"";

/// Join per-node etags in node order and wrap them in quotes.
///
/// ```
/// use kframe_storage::composite_etag;
///
/// assert_eq!(composite_etag(["a1", "b2"]), "\"a1 b2\"");
/// ```
pub fn composite_etag<I, S>(etags: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = etags
        .into_iter()
        .map(|etag| etag.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    format!("\"{}\"", joined)
}

/// True when an `If-None-Match` value names the i-frame.
pub fn is_iframe_etag(value: &str) -> bool {
    value.trim() == IFRAME_ETAG
}

/// Result of a frame cache read, carrying build metadata.
#[derive(Debug, Clone)]
pub struct FrameRead<T> {
    value: T,
    built_at: DateTime<Utc>,
    was_cache_hit: bool,
}

impl<T> FrameRead<T> {
    /// A read served from an existing cache entry.
    pub fn from_cache(value: T, built_at: DateTime<Utc>) -> Self {
        Self {
            value,
            built_at,
            was_cache_hit: true,
        }
    }

    /// A read that had to build the entry.
    pub fn from_build(value: T, built_at: DateTime<Utc>) -> Self {
        Self {
            value,
            built_at,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the underlying entry was built.
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Time since the entry was built.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.built_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// True when this read performed a build.
    pub fn was_built(&self) -> bool {
        !self.was_cache_hit
    }

    pub fn map<U, F>(self, f: F) -> FrameRead<U>
    where
        F: FnOnce(T) -> U,
    {
        FrameRead {
            value: f(self.value),
            built_at: self.built_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for FrameRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
