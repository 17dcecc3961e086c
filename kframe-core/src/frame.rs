//! Frame data model.
//!
//! An i-frame is the full index of every chapter at one [`FrameVersion`]; a
//! p-frame is the delta (additions plus deletions) recorded since that
//! version. Both travel as one entry per node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Version of a frame, used as the p-frame cache key.
///
/// Zero means the upstream has nothing to serve.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FrameVersion(i64);

impl FrameVersion {
    pub const ZERO: FrameVersion = FrameVersion(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version derived from a wall-clock instant (microsecond ticks).
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros())
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FrameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FrameVersion {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

/// Name of one logical collection, e.g. `"articles"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chapter(String);

impl Chapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Chapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Chapter {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Chapter {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Chapter {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identity of a record within its chapter. Sources emit either integer or
/// string keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Extract an identity from a JSON value; floats, objects and arrays
    /// are not identities.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(v) => write!(f, "{}", v),
            RecordId::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        RecordId::Text(value)
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// A record with a required `id` plus opaque payload fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl KeyedRecord {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Add a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Removal of one record from one chapter. Serialized as `{id, t}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Deletion {
    pub id: RecordId,
    #[serde(rename = "t")]
    pub chapter: Chapter,
}

impl Deletion {
    pub fn new(chapter: impl Into<Chapter>, id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            chapter: chapter.into(),
        }
    }
}

// ============================================================================
// FRAME ENTRIES
// ============================================================================

/// One node's share of an i-frame: `{ frame, <chapter>: [...], ... }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IFrameEntry {
    pub frame: FrameVersion,
    #[serde(flatten)]
    pub chapters: BTreeMap<Chapter, Vec<KeyedRecord>>,
}

impl IFrameEntry {
    pub fn new(frame: FrameVersion) -> Self {
        Self {
            frame,
            chapters: BTreeMap::new(),
        }
    }

    pub fn with_chapter(mut self, chapter: impl Into<Chapter>, records: Vec<KeyedRecord>) -> Self {
        self.chapters.insert(chapter.into(), records);
        self
    }
}

/// One node's share of a p-frame: additions per chapter plus `del`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PFrameEntry {
    #[serde(default)]
    pub frame: FrameVersion,
    #[serde(default)]
    pub del: Vec<Deletion>,
    #[serde(flatten)]
    pub chapters: BTreeMap<Chapter, Vec<KeyedRecord>>,
}

impl PFrameEntry {
    pub fn new(frame: FrameVersion) -> Self {
        Self {
            frame,
            del: Vec::new(),
            chapters: BTreeMap::new(),
        }
    }

    pub fn with_chapter(mut self, chapter: impl Into<Chapter>, records: Vec<KeyedRecord>) -> Self {
        self.chapters.insert(chapter.into(), records);
        self
    }

    pub fn with_deletion(mut self, deletion: Deletion) -> Self {
        self.del.push(deletion);
        self
    }

    /// True when the entry carries no additions and no deletions.
    pub fn is_empty(&self) -> bool {
        self.del.is_empty() && self.chapters.values().all(Vec::is_empty)
    }
}

/// Cheap staleness fingerprint recorded alongside a p-frame build.
///
/// Equality looks only at `keys` and `max_date`; `frame` is the version the
/// check was computed against and is replayed when recomputing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameCheck {
    pub frame: FrameVersion,
    pub keys: Vec<i64>,
    pub max_date: Option<DateTime<Utc>>,
}

impl FrameCheck {
    pub fn new(frame: FrameVersion, keys: Vec<i64>, max_date: Option<DateTime<Utc>>) -> Self {
        Self {
            frame,
            keys,
            max_date,
        }
    }
}

impl PartialEq for FrameCheck {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys && self.max_date == other.max_date
    }
}

impl Eq for FrameCheck {}

// ============================================================================
// MERGED FRAME
// ============================================================================

/// Merged records per chapter, keyed by identity.
pub type MergedChapters = BTreeMap<Chapter, BTreeMap<RecordId, KeyedRecord>>;

/// The caller-visible dataset: every chapter after applying the p-frame to
/// the i-frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedFrame {
    pub version: FrameVersion,
    /// Wall-clock time of the merge, used for client-side expiry.
    pub frame_date: DateTime<Utc>,
    pub chapters: MergedChapters,
}

impl MergedFrame {
    pub fn new(version: FrameVersion, frame_date: DateTime<Utc>, chapters: MergedChapters) -> Self {
        Self {
            version,
            frame_date,
            chapters,
        }
    }

    pub fn chapter(&self, chapter: &str) -> Option<&BTreeMap<RecordId, KeyedRecord>> {
        self.chapters.get(chapter)
    }

    pub fn get(&self, chapter: &str, id: &RecordId) -> Option<&KeyedRecord> {
        self.chapters.get(chapter).and_then(|records| records.get(id))
    }

    /// Total number of records across chapters.
    pub fn len(&self) -> usize {
        self.chapters.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once `now` has reached `frame_date + expires`.
    pub fn is_expired(&self, expires: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(expires) {
            Ok(expires) => now >= self.frame_date + expires,
            Err(_) => false,
        }
    }
}
