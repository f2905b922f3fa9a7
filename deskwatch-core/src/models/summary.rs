use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::item::ItemId;

/// Location of the first detection in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub timestamp: ItemId,
    pub width: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub image: Option<Value>,
}

/// Folded view of one time bucket, as written to the summary file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub timebin: String,
    pub total_samples: usize,
    pub max_person_count: u32,
    pub was_at_desk: bool,
    pub was_at_monitor: bool,
    pub positions: Vec<PositionSample>,
}
