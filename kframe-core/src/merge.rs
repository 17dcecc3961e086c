//! Delta merge.
//!
//! Combines an i-frame with its p-frame, node by node. For every chapter the
//! result starts from the index, drops deleted ids, drops ids superseded by
//! the delta, then adds every delta record. Deletions only ever touch index
//! records, never delta additions.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::{FrameResult, UpstreamError, WireError};
use crate::frame::{
    Chapter, Deletion, IFrameEntry, KeyedRecord, MergedChapters, MergedFrame, PFrameEntry,
    RecordId,
};

/// Merge one chapter.
pub fn merge_chapter(
    index: &[KeyedRecord],
    additions: &[KeyedRecord],
    deleted: &HashSet<&RecordId>,
) -> BTreeMap<RecordId, KeyedRecord> {
    let mut merged: BTreeMap<RecordId, KeyedRecord> = index
        .iter()
        .filter(|record| !deleted.contains(&record.id))
        .map(|record| (record.id.clone(), record.clone()))
        .collect();
    // Delta wins on collision, so it is applied last.
    for record in additions {
        merged.insert(record.id.clone(), record.clone());
    }
    merged
}

fn deleted_ids<'a>(deletions: &'a [Deletion], chapter: &Chapter) -> HashSet<&'a RecordId> {
    deletions
        .iter()
        .filter(|deletion| &deletion.chapter == chapter)
        .map(|deletion| &deletion.id)
        .collect()
}

/// Merge one node's i-frame entry with its p-frame entry into `into`.
///
/// A chapter is included when its key appears on either side.
pub fn merge_entry(index: &IFrameEntry, delta: &PFrameEntry, into: &mut MergedChapters) {
    let empty: Vec<KeyedRecord> = Vec::new();
    let chapters: Vec<&Chapter> = {
        let mut seen: Vec<&Chapter> = index.chapters.keys().collect();
        seen.extend(delta.chapters.keys().filter(|c| !index.chapters.contains_key(*c)));
        seen
    };

    for chapter in chapters {
        let index_records = index.chapters.get(chapter).unwrap_or(&empty);
        let additions = delta.chapters.get(chapter).unwrap_or(&empty);
        let deleted = deleted_ids(&delta.del, chapter);
        let merged = merge_chapter(index_records, additions, &deleted);
        into.entry(chapter.clone()).or_default().extend(merged);
    }
}

/// Merge every node. Both sides must carry one entry per node, in node order.
pub fn merge_frames(index: &[IFrameEntry], delta: &[PFrameEntry]) -> FrameResult<MergedChapters> {
    if index.len() != delta.len() {
        return Err(WireError::InvalidShape {
            reason: format!(
                "i-frame has {} nodes but p-frame has {}",
                index.len(),
                delta.len()
            ),
        }
        .into());
    }

    let mut merged = MergedChapters::new();
    for (i, p) in index.iter().zip(delta) {
        merge_entry(i, p, &mut merged);
    }
    Ok(merged)
}

/// Merge into a [`MergedFrame`] stamped with `frame_date`.
///
/// The version is taken from the first i-frame entry and must be non-zero.
pub fn merge_into_frame(
    index: &[IFrameEntry],
    delta: &[PFrameEntry],
    frame_date: DateTime<Utc>,
) -> FrameResult<MergedFrame> {
    let version = match index.first() {
        Some(entry) if !entry.frame.is_zero() => entry.frame,
        _ => return Err(UpstreamError::EmptyUpstreamResult.into()),
    };
    let chapters = merge_frames(index, delta)?;
    Ok(MergedFrame::new(version, frame_date, chapters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameVersion;
    use proptest::prelude::*;
    use serde_json::json;

    fn article(id: i64, title: &str) -> KeyedRecord {
        KeyedRecord::new(id).with_field("title", title)
    }

    fn worked_example() -> (IFrameEntry, PFrameEntry) {
        let index = IFrameEntry::new(FrameVersion::new(100))
            .with_chapter("articles", vec![article(1, "a"), article(2, "b")]);
        let delta = PFrameEntry::new(FrameVersion::new(100))
            .with_chapter("articles", vec![article(2, "b2"), article(3, "c")])
            .with_deletion(Deletion::new("articles", 1));
        (index, delta)
    }

    #[test]
    fn test_worked_example() {
        let (index, delta) = worked_example();
        let merged = merge_frames(&[index], &[delta]).unwrap();
        let articles = &merged["articles"];

        assert_eq!(articles.len(), 2);
        assert!(!articles.contains_key(&RecordId::Int(1)));
        assert_eq!(articles[&RecordId::Int(2)].get("title"), Some(&json!("b2")));
        assert_eq!(articles[&RecordId::Int(3)].get("title"), Some(&json!("c")));
    }

    #[test]
    fn test_deletion_does_not_touch_delta_additions() {
        let index = IFrameEntry::new(FrameVersion::new(1)).with_chapter("tags", vec![]);
        let delta = PFrameEntry::new(FrameVersion::new(1))
            .with_chapter("tags", vec![KeyedRecord::new(9)])
            .with_deletion(Deletion::new("tags", 9));
        let merged = merge_frames(&[index], &[delta]).unwrap();
        assert!(merged["tags"].contains_key(&RecordId::Int(9)));
    }

    #[test]
    fn test_deletion_scoped_to_its_chapter() {
        let index = IFrameEntry::new(FrameVersion::new(1))
            .with_chapter("a", vec![KeyedRecord::new(1)])
            .with_chapter("b", vec![KeyedRecord::new(1)]);
        let delta = PFrameEntry::new(FrameVersion::new(1)).with_deletion(Deletion::new("a", 1));
        let merged = merge_frames(&[index], &[delta]).unwrap();
        assert!(merged["a"].is_empty());
        assert_eq!(merged["b"].len(), 1);
    }

    #[test]
    fn test_duplicate_deletions_are_noops() {
        let (index, delta) = worked_example();
        let delta = delta
            .with_deletion(Deletion::new("articles", 1))
            .with_deletion(Deletion::new("articles", 1));
        let merged = merge_frames(&[index], &[delta]).unwrap();
        assert_eq!(merged["articles"].len(), 2);
    }

    #[test]
    fn test_chapter_on_one_side_is_included() {
        let index = IFrameEntry::new(FrameVersion::new(1)).with_chapter("only_i", vec![KeyedRecord::new(1)]);
        let delta = PFrameEntry::new(FrameVersion::new(1)).with_chapter("only_p", vec![KeyedRecord::new(2)]);
        let merged = merge_frames(&[index], &[delta]).unwrap();
        assert_eq!(merged["only_i"].len(), 1);
        assert_eq!(merged["only_p"].len(), 1);
        assert!(!merged.contains_key("missing"));
    }

    #[test]
    fn test_empty_chapter_key_is_kept() {
        let index = IFrameEntry::new(FrameVersion::new(1)).with_chapter("drafts", Vec::new());
        let delta = PFrameEntry::new(FrameVersion::new(1)).with_chapter("drafts", Vec::new());
        let merged = merge_frames(&[index], &[delta]).unwrap();
        assert!(merged["drafts"].is_empty());

        let bare = IFrameEntry::new(FrameVersion::new(1));
        let merged = merge_frames(&[bare], &[PFrameEntry::default()]).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn test_node_count_mismatch_is_rejected() {
        let (index, _) = worked_example();
        let err = merge_frames(&[index], &[]).unwrap_err();
        assert!(matches!(err, crate::FrameError::Wire(WireError::InvalidShape { .. })));
    }

    #[test]
    fn test_merge_into_frame_requires_version() {
        let index = IFrameEntry::new(FrameVersion::ZERO);
        let err = merge_into_frame(&[index], &[PFrameEntry::default()], Utc::now()).unwrap_err();
        assert_eq!(err, crate::FrameError::from(UpstreamError::EmptyUpstreamResult));

        let err = merge_into_frame(&[], &[], Utc::now()).unwrap_err();
        assert_eq!(err, crate::FrameError::from(UpstreamError::EmptyUpstreamResult));
    }

    #[test]
    fn test_multiple_nodes_merge_independently() {
        let (index, delta) = worked_example();
        let kv_index = IFrameEntry::new(FrameVersion::new(100))
            .with_chapter("settings", vec![KeyedRecord::new("theme").with_field("v", "dark")]);
        let kv_delta = PFrameEntry::new(FrameVersion::new(100))
            .with_deletion(Deletion::new("articles", 2));
        let frame = merge_into_frame(&[index, kv_index], &[delta, kv_delta], Utc::now()).unwrap();

        assert_eq!(frame.version, FrameVersion::new(100));
        // The kv node's deletion only applies to its own i-frame entry.
        assert_eq!(frame.chapter("articles").unwrap().len(), 2);
        assert!(frame.get("settings", &RecordId::from("theme")).is_some());
    }

    fn arb_records() -> impl Strategy<Value = Vec<KeyedRecord>> {
        prop::collection::vec((0i64..20, "[a-z]{1,4}"), 0..12).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(id, title)| KeyedRecord::new(id).with_field("title", title))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(index in arb_records(), additions in arb_records(), dels in prop::collection::vec(0i64..20, 0..6)) {
            let i = IFrameEntry::new(FrameVersion::new(1)).with_chapter("c", index);
            let mut p = PFrameEntry::new(FrameVersion::new(1)).with_chapter("c", additions);
            p.del = dels.into_iter().map(|id| Deletion::new("c", id)).collect();

            let first = merge_frames(&[i.clone()], &[p.clone()]).unwrap();
            let second = merge_frames(&[i], &[p]).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_delete_wins_over_stale_index(index in arb_records(), dels in prop::collection::vec(0i64..20, 1..6)) {
            let i = IFrameEntry::new(FrameVersion::new(1)).with_chapter("c", index);
            let mut p = PFrameEntry::new(FrameVersion::new(1));
            p.del = dels.iter().map(|id| Deletion::new("c", *id)).collect();

            let merged = merge_frames(&[i], &[p]).unwrap();
            for id in dels {
                prop_assert!(!merged["c"].contains_key(&RecordId::Int(id)));
            }
        }

        #[test]
        fn prop_add_wins_over_stale_index(index in arb_records(), additions in arb_records()) {
            let i = IFrameEntry::new(FrameVersion::new(1)).with_chapter("c", index);
            let p = PFrameEntry::new(FrameVersion::new(1)).with_chapter("c", additions.clone());

            let merged = merge_frames(&[i], &[p]).unwrap();
            // Within the delta the last record per id is the one kept.
            let mut expected: BTreeMap<RecordId, KeyedRecord> = BTreeMap::new();
            for record in additions {
                expected.insert(record.id.clone(), record);
            }
            for (id, record) in expected {
                prop_assert_eq!(&merged["c"][&id], &record);
            }
        }
    }
}
