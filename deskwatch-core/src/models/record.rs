//! Stored result records and their read-side normalization.
//!
//! A stored payload is either a skip record written by the dark-frame filter
//! or whatever the inference workflow returned. Workflow payloads are loosely
//! shaped: the document may be wrapped in a one-element list, and the desk
//! flags usually arrive as `["true (0.92)"]`. Everything downstream works on
//! the normalized [`ResultRecord`] only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::item::ItemId;

pub const SKIP_MESSAGE: &str =
    "The dark-frame filter determined that this image is mostly black and should be ignored";

/// Synthetic record persisted for a discarded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub skipped: bool,
    pub message: String,
    #[serde(alias = "eval_time_utc")]
    pub eval_time: DateTime<Utc>,
    pub image: ItemId,
}

impl SkipRecord {
    pub fn new(image: ItemId, eval_time: DateTime<Utc>) -> Self {
        Self {
            skipped: true,
            message: SKIP_MESSAGE.to_string(),
            eval_time,
            image,
        }
    }
}

/// Raw document shape as found on disk.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Single(Map<String, Value>),
    Sequence(Vec<Value>),
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record for {id} is not an object or a list of objects")]
    Shape { id: ItemId },

    #[error("record for {id} is an empty list")]
    Empty { id: ItemId },
}

/// Tri-state for a boolean-like workflow field.
#[derive(Debug, Clone, PartialEq)]
pub enum Flag {
    Absent,
    /// Normalized to a genuine boolean.
    Known(bool),
    /// Present but left as-is (person count other than one, or unrecognized shape).
    Unresolved(Value),
}

impl Flag {
    /// Only resolved flags count; anything else is treated as unknown.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Flag::Known(b) => Some(*b),
            _ => None,
        }
    }

    fn normalize(raw: Option<&Value>, single_person: bool) -> Self {
        let Some(raw) = raw else {
            return Flag::Absent;
        };
        if !single_person {
            return Flag::Unresolved(raw.clone());
        }
        match raw {
            Value::Bool(b) => Flag::Known(*b),
            Value::String(s) => Flag::Known(s.contains("true")),
            Value::Array(items) => match items.first() {
                Some(Value::String(s)) => Flag::Known(s.contains("true")),
                Some(Value::Bool(b)) => Flag::Known(*b),
                _ => Flag::Unresolved(raw.clone()),
            },
            _ => Flag::Unresolved(raw.clone()),
        }
    }
}

/// One object detection from the workflow's `predictions.predictions` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

/// Normalized view of one inference payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRecord {
    /// Equal to the item identity.
    pub timestamp: ItemId,
    pub person_count: u32,
    pub is_at_desk: Flag,
    pub is_facing_monitor: Flag,
    /// Length of the raw `predictions.predictions` list.
    pub detection_count: usize,
    /// The list's first entry, if it is a well-formed detection.
    pub first_detection: Option<Detection>,
    pub output_image: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultRecord {
    Skipped { message: Option<String> },
    Inference(InferenceRecord),
}

impl ResultRecord {
    /// Normalize a raw stored document for item `id`.
    pub fn normalize(id: &ItemId, raw: Value) -> Result<Self, RecordError> {
        let payload: RawPayload =
            serde_json::from_value(raw).map_err(|_| RecordError::Shape { id: id.clone() })?;

        let doc = match payload {
            RawPayload::Single(map) => map,
            RawPayload::Sequence(items) => match items.into_iter().next() {
                Some(Value::Object(map)) => map,
                Some(_) => return Err(RecordError::Shape { id: id.clone() }),
                None => return Err(RecordError::Empty { id: id.clone() }),
            },
        };

        if doc.contains_key("skipped") {
            let message = doc
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(ResultRecord::Skipped { message });
        }

        let person_count = doc.get("person_count").and_then(parse_count).unwrap_or(0);
        let single_person = person_count == 1;
        let (detection_count, first_detection) = parse_first_detection(id, doc.get("predictions"));

        Ok(ResultRecord::Inference(InferenceRecord {
            timestamp: id.clone(),
            person_count,
            is_at_desk: Flag::normalize(doc.get("is_at_desk"), single_person),
            is_facing_monitor: Flag::normalize(doc.get("is_facing_monitor"), single_person),
            detection_count,
            first_detection,
            output_image: parse_output_image(doc.get("output_image")),
        }))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ResultRecord::Skipped { .. })
    }
}

/// Accepts `3`, `3.0`, `"3"` or `[3]`.
fn parse_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n.min(u32::MAX as u64) as u32),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(items) if items.len() == 1 => parse_count(&items[0]),
        _ => None,
    }
}

/// Entry count of `predictions.predictions` and its first entry, parsed.
///
/// Later entries are never consulted: a malformed first entry yields no
/// detection at all.
fn parse_first_detection(id: &ItemId, value: Option<&Value>) -> (usize, Option<Detection>) {
    let Some(items) = value
        .and_then(|p| p.get("predictions"))
        .and_then(Value::as_array)
    else {
        return (0, None);
    };
    let first = items.first().and_then(|d| match Detection::deserialize(d) {
        Ok(detection) => Some(detection),
        Err(e) => {
            tracing::debug!(id = %id, error = %e, "Malformed first detection");
            None
        }
    });
    (items.len(), first)
}

fn parse_output_image(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Array(items) => items.first().cloned(),
        Value::Null => None,
        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id() -> ItemId {
        ItemId::from("2024-03-02T14-07-40")
    }

    fn inference(raw: Value) -> InferenceRecord {
        match ResultRecord::normalize(&id(), raw).unwrap() {
            ResultRecord::Inference(r) => r,
            other => panic!("expected inference record, got {:?}", other),
        }
    }

    #[test]
    fn test_single_person_flags_normalize_from_confidence_strings() {
        let record = inference(json!({
            "person_count": 1,
            "is_at_desk": ["true (0.9)"],
            "is_facing_monitor": ["false (0.71)"],
        }));
        assert_eq!(record.is_at_desk, Flag::Known(true));
        assert_eq!(record.is_facing_monitor, Flag::Known(false));
        assert_eq!(record.timestamp, id());
    }

    #[test]
    fn test_multi_person_flags_stay_unresolved() {
        let record = inference(json!({
            "person_count": 2,
            "is_at_desk": ["true (0.9)"],
        }));
        assert_eq!(record.is_at_desk.as_bool(), None);
        assert!(matches!(record.is_at_desk, Flag::Unresolved(_)));
        assert_eq!(record.is_facing_monitor, Flag::Absent);
    }

    #[test]
    fn test_list_wrapped_payload_is_unwrapped() {
        let record = inference(json!([{
            "person_count": 1,
            "is_at_desk": ["true (0.55)"],
            "predictions": { "predictions": [
                { "x": 10.0, "y": 20.0, "width": 5.0, "height": 8.0, "confidence": 0.8, "class": "person" }
            ]},
            "output_image": ["img-ref"],
        }]));
        assert_eq!(record.is_at_desk, Flag::Known(true));
        assert_eq!(record.detection_count, 1);
        assert_eq!(
            record.first_detection.and_then(|d| d.class).as_deref(),
            Some("person")
        );
        assert_eq!(record.output_image, Some(json!("img-ref")));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let record = inference(json!({ "predictions": {} }));
        assert_eq!(record.person_count, 0);
        assert_eq!(record.is_at_desk, Flag::Absent);
        assert_eq!(record.detection_count, 0);
        assert!(record.first_detection.is_none());
        assert!(record.output_image.is_none());
    }

    #[test]
    fn test_person_count_accepts_strings_and_floats() {
        assert_eq!(inference(json!({ "person_count": "2" })).person_count, 2);
        assert_eq!(inference(json!({ "person_count": 3.0 })).person_count, 3);
        assert_eq!(inference(json!({ "person_count": [1] })).person_count, 1);
        assert_eq!(inference(json!({ "person_count": "many" })).person_count, 0);
    }

    #[test]
    fn test_genuine_booleans_count_only_for_single_person() {
        let crowded = inference(json!({ "person_count": 3, "is_at_desk": true }));
        assert_eq!(crowded.is_at_desk.as_bool(), None);

        let empty = inference(json!({ "is_facing_monitor": true }));
        assert_eq!(empty.is_facing_monitor.as_bool(), None);

        let single = inference(json!({ "person_count": 1, "is_at_desk": true }));
        assert_eq!(single.is_at_desk, Flag::Known(true));
    }

    #[test]
    fn test_skip_record_detected_in_both_key_spellings() {
        let legacy = json!({
            "skipped": true,
            "message": "dark",
            "eval_time_utc": "2024-03-02T14:07:41.123456+00:00",
            "image": "2024-03-02T14-07-40",
        });
        assert!(ResultRecord::normalize(&id(), legacy.clone()).unwrap().is_skipped());
        let parsed: SkipRecord = serde_json::from_value(legacy).unwrap();
        assert_eq!(parsed.image, id());

        let written = serde_json::to_value(SkipRecord::new(id(), Utc::now())).unwrap();
        assert!(written.get("eval_time").is_some());
        assert!(ResultRecord::normalize(&id(), written).unwrap().is_skipped());
    }

    #[test]
    fn test_malformed_first_detection_is_not_replaced_by_later_one() {
        let record = inference(json!({
            "predictions": { "predictions": [
                { "x": 1.0, "y": 3.0, "width": 4.0, "height": 5.0 },
                { "x": 500.0, "y": 3.0, "width": 4.0, "height": 5.0, "confidence": 0.5 }
            ]}
        }));
        assert_eq!(record.detection_count, 2);
        assert!(record.first_detection.is_none());
    }

    #[test]
    fn test_first_detection_is_taken_when_well_formed() {
        let record = inference(json!({
            "predictions": { "predictions": [
                { "x": 2.0, "y": 3.0, "width": 4.0, "height": 5.0, "confidence": 0.5 },
                { "x": 1.0 }
            ]}
        }));
        assert_eq!(record.first_detection.map(|d| d.x), Some(2.0));
    }

    #[test]
    fn test_rejects_non_object_payloads() {
        assert!(matches!(
            ResultRecord::normalize(&id(), json!([])),
            Err(RecordError::Empty { .. })
        ));
        assert!(matches!(
            ResultRecord::normalize(&id(), json!("text")),
            Err(RecordError::Shape { .. })
        ));
        assert!(matches!(
            ResultRecord::normalize(&id(), json!([1, 2])),
            Err(RecordError::Shape { .. })
        ));
    }
}
