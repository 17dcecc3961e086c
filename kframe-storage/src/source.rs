//! Frame source capability.
//!
//! A source produces the records of the chapters it owns. Sources that share
//! one backing connection are grouped into a [`FrameNode`]; the repository
//! produces exactly one i-frame entry and one p-frame entry per node.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kframe_core::{Chapter, FrameCheck, FrameResult, FrameVersion, IFrameEntry, PFrameEntry};

/// Output of a delta query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaBuild {
    /// Additions and deletions since the requested version. Empty when the
    /// query was a cheap check.
    pub entry: PFrameEntry,
    /// Staleness fingerprint of the node at query time.
    pub check: FrameCheck,
    /// Node etag, contributed to the composite p-frame etag.
    pub etag: String,
}

/// Capability set consumed by the frame cache.
///
/// Implementations must be safe to call concurrently; the cache serializes
/// delta builds but index builds and administrative calls may overlap.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Full current record set of `chapters` plus the current version.
    async fn get_index(&self, chapters: &[Chapter]) -> FrameResult<IFrameEntry>;

    /// Delta of `chapters` since `since`.
    ///
    /// With `full_rebuild == false` only the check has to be computed; the
    /// entry and etag may be left empty.
    async fn get_delta(
        &self,
        chapters: &[Chapter],
        since: FrameVersion,
        full_rebuild: bool,
    ) -> FrameResult<DeltaBuild>;

    /// Empty the backing tables. Returns a status line.
    async fn clear(&self, chapters: &[Chapter]) -> FrameResult<String>;

    /// Create the backing tables. Returns a status line.
    async fn install(&self, chapters: &[Chapter]) -> FrameResult<String>;

    /// Drop the backing tables. Returns a status line.
    async fn uninstall(&self, chapters: &[Chapter]) -> FrameResult<String>;
}

/// A group of chapters served through one source.
#[derive(Clone)]
pub struct FrameNode {
    pub name: String,
    pub source: Arc<dyn FrameSource>,
    pub chapters: Vec<Chapter>,
}

impl FrameNode {
    pub fn new<I, C>(name: impl Into<String>, source: Arc<dyn FrameSource>, chapters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Chapter>,
    {
        Self {
            name: name.into(),
            source,
            chapters: chapters.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Debug for FrameNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameNode")
            .field("name", &self.name)
            .field("chapters", &self.chapters)
            .finish_non_exhaustive()
    }
}
