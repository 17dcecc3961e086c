//! KFrame Storage - Frame Sources and Frame Cache
//!
//! Server side of the frame protocol:
//! - [`FrameSource`] capability and [`FrameNode`] grouping
//! - [`FrameIndexBuilder`]: i-frame snapshot with absolute expiration
//! - [`FrameDeltaCache`] and [`RevalidationGate`]: single-flight p-frame
//!   builds with quiet revalidation on expiry
//! - Composite etags and conditional-request checks
//! - [`FrameRepository`]: composition root with administrative operations
//! - [`InMemoryFrameSource`]: reference source kept in process memory

pub mod cache;
pub mod memory;
pub mod repository;
pub mod source;

pub use cache::{
    composite_etag, is_iframe_etag, FrameCacheCounters, FrameCacheStats, FrameDeltaCache,
    FrameIndexBuilder, FrameRead, IFrame, PFrame, Revalidation, RevalidationGate, IFRAME_ETAG,
};
pub use memory::InMemoryFrameSource;
pub use repository::{AdminAction, AdminReply, FrameOptions, FrameRepository, INVALID_ACCESS_TOKEN};
pub use source::{DeltaBuild, FrameNode, FrameSource};
