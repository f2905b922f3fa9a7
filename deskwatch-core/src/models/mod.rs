pub mod item;
pub mod record;
pub mod summary;

pub use item::{ItemId, ItemStatus};
pub use record::{Detection, Flag, InferenceRecord, RecordError, ResultRecord, SkipRecord};
pub use summary::{BucketSummary, PositionSample};
