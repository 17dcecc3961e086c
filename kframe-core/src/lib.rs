//! KFrame Core - Frame Data Model and Delta Merge
//!
//! Types shared by the frame server and its clients: versions, chapters,
//! keyed records, i-frame and p-frame entries, staleness fingerprints, the
//! delta merge and the error taxonomy. Nothing in this crate performs I/O.

pub mod config;
pub mod error;
pub mod frame;
pub mod merge;
pub mod wire;

pub use config::FrameTiming;
pub use error::{CacheError, ConfigError, FrameError, FrameResult, UpstreamError, WireError};
pub use frame::{
    Chapter, Deletion, FrameCheck, FrameVersion, IFrameEntry, KeyedRecord, MergedChapters,
    MergedFrame, PFrameEntry, RecordId,
};
pub use merge::{merge_chapter, merge_entry, merge_frames, merge_into_frame};
pub use wire::{decode_iframes, decode_pframes, decode_record, Decoded};
