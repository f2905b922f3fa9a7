use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capture-time layout of an item identity: ISO-8601 at second resolution
/// with `:` replaced by `-` so it is filesystem safe.
pub const ID_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Identity of one captured frame, e.g. `2024-03-02T14-07-40`.
///
/// Identities sort lexicographically in capture order and double as the
/// file stem of both the corpus image and its stored result.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity for a frame captured at `at`.
    pub fn from_capture_time(at: NaiveDateTime) -> Self {
        Self(at.format(ID_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Capture timestamp embedded in the identity, if it parses.
    pub fn captured_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.0, ID_FORMAT).ok()
    }

    /// Key of the time bucket this item falls into.
    ///
    /// Formatted as `{YYYY-MM-DD}T{HH}-{minute}` where minute is the bucket
    /// start (not zero padded): `2024-03-02T14-0`, `2024-03-02T14-45`.
    pub fn bucket_key(&self, bucket_minutes: u32) -> Option<String> {
        let at = self.captured_at()?;
        let width = bucket_minutes.clamp(1, 60);
        let start = (at.minute() / width) * width;
        Some(format!(
            "{:04}-{:02}-{:02}T{:02}-{}",
            at.year(),
            at.month(),
            at.day(),
            at.hour(),
            start
        ))
    }
}

/// Where an item stands in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// No result record yet; picked up by the next run.
    Unseen,
    Discarded,
    Inferred,
    /// Failed during the current run. Leaves no record, so it reverts to `Unseen`.
    Errored,
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
