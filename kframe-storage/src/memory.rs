//! In-memory frame source.
//!
//! Keeps one table per chapter. Every mutation bumps a sequence number that
//! doubles as the frame version, and deletions leave tombstones so deltas can
//! report them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use kframe_core::{
    decode_record, Chapter, Deletion, FrameCheck, FrameResult, FrameVersion, IFrameEntry,
    KeyedRecord, PFrameEntry, RecordId, UpstreamError, WireError,
};

use crate::source::{DeltaBuild, FrameSource};

#[derive(Debug, Clone)]
struct StoredRow {
    record: KeyedRecord,
    sequence: i64,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    sequence: i64,
    deleted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ChapterTable {
    rows: BTreeMap<RecordId, StoredRow>,
    tombstones: BTreeMap<RecordId, Tombstone>,
}

impl ChapterTable {
    fn max_date(&self) -> Option<DateTime<Utc>> {
        let rows = self.rows.values().map(|row| row.modified_at);
        let tombstones = self.tombstones.values().map(|t| t.deleted_at);
        rows.chain(tombstones).max()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    sequence: i64,
    last_stamp: Option<DateTime<Utc>>,
    tables: BTreeMap<Chapter, ChapterTable>,
}

impl MemoryState {
    /// Next sequence and a strictly increasing modification time.
    fn advance(&mut self) -> (i64, DateTime<Utc>) {
        self.sequence += 1;
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        (self.sequence, stamp)
    }

    fn table(&self, node: &str, chapter: &Chapter) -> FrameResult<&ChapterTable> {
        self.tables.get(chapter).ok_or_else(|| not_installed(node, chapter))
    }

    fn table_mut(&mut self, node: &str, chapter: &Chapter) -> FrameResult<&mut ChapterTable> {
        self.tables
            .get_mut(chapter)
            .ok_or_else(|| not_installed(node, chapter))
    }
}

fn not_installed(node: &str, chapter: &Chapter) -> kframe_core::FrameError {
    UpstreamError::Source {
        node: node.to_string(),
        reason: format!("chapter {} is not installed", chapter),
    }
    .into()
}

/// Reference [`FrameSource`] backed by process memory.
#[derive(Debug)]
pub struct InMemoryFrameSource {
    name: String,
    state: RwLock<MemoryState>,
}

impl InMemoryFrameSource {
    /// Create a source with no chapters installed.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Create a source with `chapters` installed and empty.
    pub fn with_chapters<I, C>(name: impl Into<String>, chapters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Chapter>,
    {
        let tables = chapters
            .into_iter()
            .map(|chapter| (chapter.into(), ChapterTable::default()))
            .collect();
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState {
                tables,
                ..Default::default()
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current frame version. Zero until the first mutation.
    pub async fn version(&self) -> FrameVersion {
        FrameVersion::new(self.state.read().await.sequence)
    }

    /// Installed chapters.
    pub async fn chapters(&self) -> Vec<Chapter> {
        self.state.read().await.tables.keys().cloned().collect()
    }

    /// Insert or replace a record.
    pub async fn upsert(&self, chapter: impl Into<Chapter>, record: KeyedRecord) -> FrameResult<FrameVersion> {
        let chapter = chapter.into();
        let mut state = self.state.write().await;
        state.table(&self.name, &chapter)?;
        let (sequence, modified_at) = state.advance();
        let table = state.table_mut(&self.name, &chapter)?;
        table.tombstones.remove(&record.id);
        table.rows.insert(
            record.id.clone(),
            StoredRow {
                record,
                sequence,
                modified_at,
            },
        );
        Ok(FrameVersion::new(sequence))
    }

    /// Delete a record. Returns false when it did not exist.
    pub async fn remove(&self, chapter: impl Into<Chapter>, id: impl Into<RecordId>) -> FrameResult<bool> {
        let chapter = chapter.into();
        let id = id.into();
        let mut state = self.state.write().await;
        if !state.table(&self.name, &chapter)?.rows.contains_key(&id) {
            return Ok(false);
        }
        let (sequence, deleted_at) = state.advance();
        let table = state.table_mut(&self.name, &chapter)?;
        table.rows.remove(&id);
        table.tombstones.insert(
            id,
            Tombstone {
                sequence,
                deleted_at,
            },
        );
        Ok(true)
    }

    /// Load `{ "<chapter>": [ {id, ...}, ... ] }`, installing chapters as
    /// needed. Returns the number of records loaded.
    pub async fn seed(&self, value: Value) -> FrameResult<usize> {
        let Value::Object(chapters) = value else {
            return Err(WireError::InvalidShape {
                reason: "seed must be an object of chapters".to_string(),
            }
            .into());
        };

        let mut loaded = 0;
        for (name, records) in chapters {
            let chapter = Chapter::new(name);
            let Value::Array(records) = records else {
                return Err(WireError::MalformedChapterValue {
                    chapter,
                    reason: "expected array".to_string(),
                }
                .into());
            };
            self.state
                .write()
                .await
                .tables
                .entry(chapter.clone())
                .or_default();
            for record in records {
                let record = decode_record(record).map_err(|reason| WireError::MalformedChapterValue {
                    chapter: chapter.clone(),
                    reason,
                })?;
                self.upsert(chapter.clone(), record).await?;
                loaded += 1;
            }
        }
        debug!(node = %self.name, records = loaded, "seeded in-memory source");
        Ok(loaded)
    }
}

fn digest(entry: &PFrameEntry, node: &str) -> FrameResult<String> {
    let bytes = serde_json::to_vec(entry).map_err(|err| UpstreamError::Source {
        node: node.to_string(),
        reason: err.to_string(),
    })?;
    let hash = Sha256::digest(&bytes);
    Ok(hex::encode(&hash[..8]))
}

#[async_trait]
impl FrameSource for InMemoryFrameSource {
    async fn get_index(&self, chapters: &[Chapter]) -> FrameResult<IFrameEntry> {
        let state = self.state.read().await;
        let mut entry = IFrameEntry::new(FrameVersion::new(state.sequence));
        for chapter in chapters {
            let table = state.table(&self.name, chapter)?;
            let records = table.rows.values().map(|row| row.record.clone()).collect();
            entry.chapters.insert(chapter.clone(), records);
        }
        Ok(entry)
    }

    async fn get_delta(
        &self,
        chapters: &[Chapter],
        since: FrameVersion,
        full_rebuild: bool,
    ) -> FrameResult<DeltaBuild> {
        let state = self.state.read().await;
        let since_seq = since.as_i64();

        let mut keys = Vec::with_capacity(chapters.len());
        let mut max_date: Option<DateTime<Utc>> = None;
        let mut entry = PFrameEntry::new(since);
        for chapter in chapters {
            let table = state.table(&self.name, chapter)?;
            keys.push(table.rows.len() as i64);
            max_date = max_date.max(table.max_date());

            if !full_rebuild {
                continue;
            }
            let additions = table
                .rows
                .values()
                .filter(|row| row.sequence > since_seq)
                .map(|row| row.record.clone())
                .collect();
            entry.chapters.insert(chapter.clone(), additions);
            entry.del.extend(
                table
                    .tombstones
                    .iter()
                    .filter(|(_, t)| t.sequence > since_seq)
                    .map(|(id, _)| Deletion::new(chapter.clone(), id.clone())),
            );
        }

        let check = FrameCheck::new(since, keys, max_date);
        if !full_rebuild {
            return Ok(DeltaBuild {
                entry,
                check,
                etag: String::new(),
            });
        }
        let etag = digest(&entry, &self.name)?;
        Ok(DeltaBuild { entry, check, etag })
    }

    async fn clear(&self, chapters: &[Chapter]) -> FrameResult<String> {
        let mut state = self.state.write().await;
        for chapter in chapters {
            state.table(&self.name, chapter)?;
        }
        state.advance();
        let mut status = String::new();
        for chapter in chapters {
            let table = state.table_mut(&self.name, chapter)?;
            table.rows.clear();
            table.tombstones.clear();
            status.push_str(&format!("{}: cleared {}\n", self.name, chapter));
        }
        Ok(status)
    }

    async fn install(&self, chapters: &[Chapter]) -> FrameResult<String> {
        let mut state = self.state.write().await;
        let mut status = String::new();
        for chapter in chapters {
            if state.tables.contains_key(chapter) {
                status.push_str(&format!("{}: {} already installed\n", self.name, chapter));
            } else {
                state.tables.insert(chapter.clone(), ChapterTable::default());
                status.push_str(&format!("{}: installed {}\n", self.name, chapter));
            }
        }
        Ok(status)
    }

    async fn uninstall(&self, chapters: &[Chapter]) -> FrameResult<String> {
        let mut state = self.state.write().await;
        let mut status = String::new();
        for chapter in chapters {
            if state.tables.remove(chapter).is_some() {
                status.push_str(&format!("{}: uninstalled {}\n", self.name, chapter));
            } else {
                status.push_str(&format!("{}: {} not installed\n", self.name, chapter));
            }
        }
        Ok(status)
    }
}
