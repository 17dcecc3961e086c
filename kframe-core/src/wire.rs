//! Lenient decoding of frame payloads received over the wire.
//!
//! Each chapter must be an array of objects carrying an `id`. A chapter that
//! breaks that schema is skipped and reported; the remaining chapters are
//! still decoded.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{FrameResult, WireError};
use crate::frame::{Chapter, Deletion, FrameVersion, IFrameEntry, KeyedRecord, PFrameEntry, RecordId};

/// Field carrying the frame version.
pub const FRAME_FIELD: &str = "frame";
/// Field carrying p-frame deletions.
pub const DELETIONS_FIELD: &str = "del";

/// Decoded entries plus the chapters that were skipped.
#[derive(Debug, Clone, Default)]
pub struct Decoded<T> {
    pub entries: Vec<T>,
    pub skipped: Vec<WireError>,
}

fn expect_entries(value: Value) -> FrameResult<Vec<Map<String, Value>>> {
    let Value::Array(items) = value else {
        return Err(WireError::InvalidShape {
            reason: "expected an array of frame entries".to_string(),
        }
        .into());
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(WireError::InvalidShape {
                reason: format!("expected a frame entry object, found {}", kind_of(&other)),
            }
            .into()),
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_frame(map: &Map<String, Value>) -> Option<FrameVersion> {
    map.get(FRAME_FIELD)
        .and_then(Value::as_i64)
        .map(FrameVersion::new)
}

/// Decode a single record, requiring an object with an identity.
pub fn decode_record(value: Value) -> Result<KeyedRecord, String> {
    let Value::Object(mut fields) = value else {
        return Err(format!("record is a {}, not an object", kind_of(&value)));
    };
    let id = fields
        .remove("id")
        .ok_or_else(|| "record has no id".to_string())?;
    let id = RecordId::from_json(&id).ok_or_else(|| format!("record id {} is not a key", id))?;
    Ok(KeyedRecord { id, fields })
}

fn decode_chapter(chapter: &Chapter, value: Value) -> Result<Vec<KeyedRecord>, WireError> {
    let Value::Array(items) = value else {
        return Err(WireError::MalformedChapterValue {
            chapter: chapter.clone(),
            reason: format!("expected array, found {}", kind_of(&value)),
        });
    };
    items
        .into_iter()
        .map(decode_record)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|reason| WireError::MalformedChapterValue {
            chapter: chapter.clone(),
            reason,
        })
}

fn decode_chapters(
    map: Map<String, Value>,
    skipped: &mut Vec<WireError>,
) -> BTreeMap<Chapter, Vec<KeyedRecord>> {
    let mut chapters = BTreeMap::new();
    for (key, value) in map {
        if key == FRAME_FIELD || key == DELETIONS_FIELD {
            continue;
        }
        let chapter = Chapter::new(key);
        match decode_chapter(&chapter, value) {
            Ok(records) => {
                chapters.insert(chapter, records);
            }
            Err(err) => skipped.push(err),
        }
    }
    chapters
}

fn decode_deletions(value: Option<&Value>) -> Vec<Deletion> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<Deletion>(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

/// Decode an i-frame response body. Every entry must carry a frame version.
pub fn decode_iframes(value: Value) -> FrameResult<Decoded<IFrameEntry>> {
    let mut decoded = Decoded::default();
    for map in expect_entries(value)? {
        let frame = decode_frame(&map).ok_or(WireError::MissingFrame)?;
        let chapters = decode_chapters(map, &mut decoded.skipped);
        decoded.entries.push(IFrameEntry { frame, chapters });
    }
    Ok(decoded)
}

/// Decode a p-frame response body. Malformed deletions are dropped.
pub fn decode_pframes(value: Value) -> FrameResult<Decoded<PFrameEntry>> {
    let mut decoded = Decoded::default();
    for map in expect_entries(value)? {
        let frame = decode_frame(&map).unwrap_or_default();
        let del = decode_deletions(map.get(DELETIONS_FIELD));
        let chapters = decode_chapters(map, &mut decoded.skipped);
        decoded.entries.push(PFrameEntry { frame, del, chapters });
    }
    Ok(decoded)
}
