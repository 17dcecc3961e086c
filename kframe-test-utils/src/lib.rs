//! KFrame Test Utilities
//!
//! Shared test infrastructure for the KFrame workspace:
//! - Proptest generators for records and frame entries
//! - A scripted frame source with call counters
//! - An in-process transport that serves frames from a repository
//! - Fixtures for common scenarios

pub use kframe_client::{ClientError, FrameTransport};
pub use kframe_core::{
    Chapter, Deletion, FrameCheck, FrameError, FrameResult, FrameVersion, IFrameEntry,
    KeyedRecord, PFrameEntry, RecordId, UpstreamError,
};
pub use kframe_storage::{
    DeltaBuild, FrameNode, FrameOptions, FrameRepository, FrameSource, InMemoryFrameSource,
};

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::Value;

// ============================================================================
// GENERATORS
// ============================================================================

/// Record identities drawn from a small range so collisions are common.
pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
    prop_oneof![
        (0i64..16).prop_map(RecordId::Int),
        "[a-d]{1,2}".prop_map(RecordId::Text),
    ]
}

pub fn arb_keyed_record() -> impl Strategy<Value = KeyedRecord> {
    (arb_record_id(), "[a-z]{0,6}")
        .prop_map(|(id, title)| KeyedRecord::new(id).with_field("title", title))
}

/// Records with unique identities, as a source would emit them.
pub fn arb_chapter_records() -> impl Strategy<Value = Vec<KeyedRecord>> {
    prop::collection::vec(arb_keyed_record(), 0..10).prop_map(|records| {
        let mut seen = std::collections::BTreeMap::new();
        for record in records {
            seen.insert(record.id.clone(), record);
        }
        seen.into_values().collect()
    })
}

pub fn arb_chapter() -> impl Strategy<Value = Chapter> {
    prop_oneof![Just("articles"), Just("tags"), Just("settings")].prop_map(Chapter::from)
}

pub fn arb_iframe_entry() -> impl Strategy<Value = IFrameEntry> {
    (1i64..1_000, prop::collection::btree_map(arb_chapter(), arb_chapter_records(), 0..3))
        .prop_map(|(frame, chapters)| IFrameEntry {
            frame: FrameVersion::new(frame),
            chapters,
        })
}

pub fn arb_pframe_entry() -> impl Strategy<Value = PFrameEntry> {
    (
        prop::collection::btree_map(arb_chapter(), arb_chapter_records(), 0..3),
        prop::collection::vec((arb_chapter(), arb_record_id()), 0..6),
    )
        .prop_map(|(chapters, dels)| PFrameEntry {
            frame: FrameVersion::ZERO,
            del: dels
                .into_iter()
                .map(|(chapter, id)| Deletion::new(chapter, id))
                .collect(),
            chapters,
        })
}

// ============================================================================
// FIXTURES
// ============================================================================

pub fn article(id: i64, title: &str) -> KeyedRecord {
    KeyedRecord::new(id).with_field("title", title)
}

/// `I.articles = {1:a, 2:b}`, `P.articles = {2:b2, 3:c}`, `P.del = [articles/1]`.
pub fn worked_example() -> (IFrameEntry, PFrameEntry) {
    let index = IFrameEntry::new(FrameVersion::new(100))
        .with_chapter("articles", vec![article(1, "a"), article(2, "b")]);
    let delta = PFrameEntry::new(FrameVersion::new(100))
        .with_chapter("articles", vec![article(2, "b2"), article(3, "c")])
        .with_deletion(Deletion::new("articles", 1));
    (index, delta)
}

/// In-memory source with `articles` seeded with two records.
pub async fn seeded_source() -> Arc<InMemoryFrameSource> {
    let source = Arc::new(InMemoryFrameSource::with_chapters("mem", ["articles"]));
    for record in [article(1, "a"), article(2, "b")] {
        source
            .upsert("articles", record)
            .await
            .expect("seed articles");
    }
    source
}

/// Repository with a single node serving `articles` from `source`.
pub fn memory_repository(
    source: Arc<InMemoryFrameSource>,
    options: FrameOptions,
) -> FrameRepository {
    let node = FrameNode::new("mem", source as Arc<dyn FrameSource>, ["articles"]);
    FrameRepository::new(vec![node], options).expect("valid repository options")
}

// ============================================================================
// SCRIPTED SOURCE
// ============================================================================

/// Frame source driven by counters.
///
/// The check and etag follow `revision`; `version` is what the index
/// reports. Every call is counted.
#[derive(Debug)]
pub struct ScriptedFrameSource {
    version: AtomicI64,
    revision: AtomicI64,
    fail_checks: AtomicBool,
    index_calls: AtomicUsize,
    full_builds: AtomicUsize,
    checks: AtomicUsize,
}

impl ScriptedFrameSource {
    pub fn new(version: i64) -> Arc<Self> {
        Arc::new(Self {
            version: AtomicI64::new(version),
            revision: AtomicI64::new(1),
            fail_checks: AtomicBool::new(false),
            index_calls: AtomicUsize::new(0),
            full_builds: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn set_version(&self, version: i64) {
        self.version.store(version, Ordering::SeqCst);
    }

    /// Change the underlying data; the next check differs.
    pub fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_checks(&self, fail: bool) {
        self.fail_checks.store(fail, Ordering::SeqCst);
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn full_builds(&self) -> usize {
        self.full_builds.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// A node serving `chapters` through this source.
    pub fn node(self: &Arc<Self>, name: &str, chapters: &[&str]) -> FrameNode {
        FrameNode::new(
            name,
            Arc::clone(self) as Arc<dyn FrameSource>,
            chapters.iter().copied(),
        )
    }
}

#[async_trait]
impl FrameSource for ScriptedFrameSource {
    async fn get_index(&self, chapters: &[Chapter]) -> FrameResult<IFrameEntry> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        let mut entry = IFrameEntry::new(FrameVersion::new(self.version.load(Ordering::SeqCst)));
        for chapter in chapters {
            entry = entry.with_chapter(chapter.clone(), vec![article(1, "indexed")]);
        }
        Ok(entry)
    }

    async fn get_delta(
        &self,
        chapters: &[Chapter],
        since: FrameVersion,
        full_rebuild: bool,
    ) -> FrameResult<DeltaBuild> {
        let revision = self.revision.load(Ordering::SeqCst);
        let check = FrameCheck::new(since, vec![revision], None);
        if !full_rebuild {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.fail_checks.load(Ordering::SeqCst) {
                return Err(UpstreamError::Source {
                    node: "scripted".to_string(),
                    reason: "check failed".to_string(),
                }
                .into());
            }
            return Ok(DeltaBuild {
                check,
                ..Default::default()
            });
        }

        self.full_builds.fetch_add(1, Ordering::SeqCst);
        let mut entry = PFrameEntry::new(since);
        for chapter in chapters {
            entry = entry.with_chapter(
                chapter.clone(),
                vec![article(revision, &format!("rev{}", revision))],
            );
        }
        Ok(DeltaBuild {
            entry,
            check,
            etag: format!("r{}", revision),
        })
    }

    async fn clear(&self, _chapters: &[Chapter]) -> FrameResult<String> {
        Ok("scripted: cleared\n".to_string())
    }

    async fn install(&self, _chapters: &[Chapter]) -> FrameResult<String> {
        Ok("scripted: installed\n".to_string())
    }

    async fn uninstall(&self, _chapters: &[Chapter]) -> FrameResult<String> {
        Ok("scripted: uninstalled\n".to_string())
    }
}

// ============================================================================
// IN-PROCESS TRANSPORT
// ============================================================================

/// [`FrameTransport`] answering `…/i` and `…/p/{version}` straight from a
/// [`FrameRepository`], with optional latency and injected failures.
#[derive(Clone)]
pub struct InProcessTransport {
    repository: FrameRepository,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<ClientError>>>,
}

impl InProcessTransport {
    pub fn new(repository: FrameRepository) -> Self {
        Self {
            repository,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of requests executed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next request with `error`.
    pub fn fail_next(&self, error: ClientError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    fn take_failure(&self) -> Option<ClientError> {
        self.failure.lock().ok().and_then(|mut failure| failure.take())
    }
}

#[async_trait]
impl FrameTransport for InProcessTransport {
    async fn execute(&self, path: &str) -> Result<Value, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        let to_json = |value: Result<Value, serde_json::Error>| {
            value.map_err(|err| ClientError::Decode(err.to_string()))
        };
        if path.ends_with("/i") {
            let iframe = self.repository.get_iframe().await?.into_value();
            return to_json(serde_json::to_value(&*iframe));
        }
        if let Some((_, version)) = path.rsplit_once("/p/") {
            let version: FrameVersion = version.parse().map_err(|_| ClientError::Transport {
                status: 404,
                body: String::new(),
            })?;
            let pframe = self.repository.get_pframe(version).await?.into_value();
            return to_json(serde_json::to_value(&*pframe.entries));
        }
        Err(ClientError::Transport {
            status: 404,
            body: format!("no route for {}", path),
        })
    }
}
