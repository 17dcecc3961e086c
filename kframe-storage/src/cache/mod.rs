//! Two-tier frame cache.
//!
//! The i-frame (full index) is cached with a fixed absolute expiration. The
//! p-frame (delta since an i-frame version) is cached per version and quietly
//! revalidated when it expires: if nothing changed it is kept with a shorter
//! polling TTL and an unchanged etag, otherwise it is dropped and rebuilt on
//! the next request.
//!
//! ```ignore
//! let iframe = repository.get_iframe().await?;
//! let version = iframe.value()[0].frame;
//! let pframe = repository.get_pframe(version).await?;
//!
//! // Conditional request: no rebuild when the etag is still cached.
//! if repository.has_pframe(&pframe.value().etag) {
//!     // 304
//! }
//! ```

pub mod delta;
pub mod freshness;
pub mod gate;
pub mod index;
pub mod stats;

pub use delta::{FrameDeltaCache, PFrame, Revalidation};
pub use freshness::{composite_etag, is_iframe_etag, FrameRead, IFRAME_ETAG};
pub use gate::RevalidationGate;
pub use index::{FrameIndexBuilder, IFrame};
pub use stats::{FrameCacheCounters, FrameCacheStats};
