//! Time-bucket aggregation: folds per-frame results into coarse windows.
//!
//! Every stored record is normalized, mapped to the bucket containing its
//! capture time, and folded into that bucket's builder. Buckets with fewer
//! than `min_samples` members are dropped.
//!
//! Fold rules per bucket:
//! - `total_samples` counts every member, skip records included
//! - `max_person_count` is the largest `person_count` (absent = 0)
//! - `was_at_desk` / `was_at_monitor` OR together only resolved flags, which
//!   exist for single-person frames only
//! - `positions` keeps the first detection of each frame, in member order;
//!   a frame whose first detection is malformed contributes none

use deskwatch_core::config::AggregateConfig;
use deskwatch_core::models::{BucketSummary, InferenceRecord, PositionSample};
use deskwatch_core::{ItemId, ResultRecord, ResultStore, StoreError};
use std::collections::BTreeMap;
use std::path::Path;

/// Aggregate output, keyed by bucket.
pub type Summary = BTreeMap<String, BucketSummary>;

/// Counters from one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateReport {
    pub records_read: usize,
    /// Records that could not be read or normalized.
    pub unreadable: usize,
    /// Records whose identity carries no parseable capture time.
    pub unbucketed: usize,
    pub buckets_formed: usize,
    pub buckets_dropped: usize,
    pub buckets_kept: usize,
}

#[derive(Debug, Clone)]
struct BucketBuilder {
    key: String,
    total_samples: usize,
    max_person_count: u32,
    was_at_desk: bool,
    was_at_monitor: bool,
    positions: Vec<PositionSample>,
}

impl BucketBuilder {
    fn new(key: String) -> Self {
        Self {
            key,
            total_samples: 0,
            max_person_count: 0,
            was_at_desk: false,
            was_at_monitor: false,
            positions: Vec::new(),
        }
    }

    fn push(&mut self, record: &ResultRecord) {
        self.total_samples += 1;

        let ResultRecord::Inference(record) = record else {
            return;
        };

        self.max_person_count = self.max_person_count.max(record.person_count);

        if let Some(at_desk) = record.is_at_desk.as_bool() {
            self.was_at_desk |= at_desk;
        }
        if let Some(at_monitor) = record.is_facing_monitor.as_bool() {
            self.was_at_monitor |= at_monitor;
        }

        if let Some(position) = position_sample(record) {
            self.positions.push(position);
        }
    }

    fn finish(self) -> BucketSummary {
        BucketSummary {
            timebin: self.key,
            total_samples: self.total_samples,
            max_person_count: self.max_person_count,
            was_at_desk: self.was_at_desk,
            was_at_monitor: self.was_at_monitor,
            positions: self.positions,
        }
    }
}

/// Position of the first detection, if the frame has a well-formed one.
fn position_sample(record: &InferenceRecord) -> Option<PositionSample> {
    let first = record.first_detection.as_ref()?;
    Some(PositionSample {
        timestamp: record.timestamp.clone(),
        width: first.width,
        height: first.height,
        x: first.x,
        y: first.y,
        confidence: first.confidence,
        image: record.output_image.clone(),
    })
}

/// Fold normalized records into bucket summaries.
///
/// Records must arrive in identity order for `positions` to be ordered by
/// capture time; the Result Store yields them that way.
pub fn aggregate<I>(records: I, config: &AggregateConfig) -> (Summary, AggregateReport)
where
    I: IntoIterator<Item = (ItemId, ResultRecord)>,
{
    let mut report = AggregateReport::default();
    let mut builders: BTreeMap<String, BucketBuilder> = BTreeMap::new();

    for (id, record) in records {
        report.records_read += 1;
        let Some(key) = id.bucket_key(config.bucket_minutes) else {
            tracing::warn!(id = %id, "Identity has no capture time, skipping record");
            report.unbucketed += 1;
            continue;
        };
        builders
            .entry(key)
            .or_insert_with_key(|k| BucketBuilder::new(k.clone()))
            .push(&record);
    }

    report.buckets_formed = builders.len();

    let summary: Summary = builders
        .into_iter()
        .filter(|(key, builder)| {
            let keep = builder.total_samples >= config.min_samples;
            if !keep {
                tracing::debug!(
                    bucket = %key,
                    samples = builder.total_samples,
                    "Dropping sparse bucket"
                );
            }
            keep
        })
        .map(|(key, builder)| (key, builder.finish()))
        .collect();

    report.buckets_kept = summary.len();
    report.buckets_dropped = report.buckets_formed - report.buckets_kept;

    (summary, report)
}

/// Aggregate every record in `store`.
///
/// Records that fail to read or normalize are logged and counted, not fatal;
/// only a store that cannot be listed is.
pub fn aggregate_store(
    store: &ResultStore,
    config: &AggregateConfig,
) -> Result<(Summary, AggregateReport), StoreError> {
    let mut unreadable = 0usize;

    let records = store.read_all()?.filter_map(|(id, record)| match record {
        Ok(record) => Some((id, record)),
        Err(e) => {
            tracing::warn!(id = %id, error = %e, "Skipping unreadable result record");
            unreadable += 1;
            None
        }
    });

    let (summary, mut report) = aggregate(records, config);
    report.records_read += unreadable;
    report.unreadable = unreadable;

    tracing::info!(
        records = report.records_read,
        unreadable = report.unreadable,
        unbucketed = report.unbucketed,
        buckets = report.buckets_formed,
        kept = report.buckets_kept,
        dropped = report.buckets_dropped,
        "Aggregation complete"
    );

    Ok((summary, report))
}

/// Write the summary as a single JSON document.
pub fn write_summary(path: &Path, summary: &Summary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec(summary)?;
    std::fs::write(path, bytes)?;
    tracing::info!(path = %path.display(), buckets = summary.len(), "Wrote summary");
    Ok(())
}
