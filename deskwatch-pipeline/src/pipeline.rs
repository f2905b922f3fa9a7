//! Run orchestration: resolve → filter → skip records → dispatch.
//!
//! Integrity violations abort before any work starts. Everything after that
//! is per-item: failures are counted in the report and the affected items
//! stay unresolved for the next run.

use deskwatch_core::{
    Corpus, DeskwatchConfig, DeskwatchError, InferenceBackend, ItemId, ItemStatus, ResultRecord,
    ResultStore,
};
use serde::Serialize;
use std::sync::Arc;

use crate::subsystems::darkframe::{self, FrameClassifier};
use crate::subsystems::dispatch;
use crate::subsystems::resolver;

/// Pool widths and batch cap for one `process` run.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub filter_workers: usize,
    pub dispatch_workers: usize,
    pub batch_cap: Option<usize>,
}

impl From<&DeskwatchConfig> for ProcessSettings {
    fn from(config: &DeskwatchConfig) -> Self {
        Self {
            filter_workers: config.filter.workers,
            dispatch_workers: config.dispatch.workers,
            batch_cap: config.dispatch.batch_cap,
        }
    }
}

/// Counts from one `process` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub corpus_items: usize,
    pub stored_before: usize,
    pub pending: usize,
    pub selected: usize,
    pub discarded: usize,
    pub kept: usize,
    pub classify_errors: usize,
    pub skip_write_errors: usize,
    pub inferred: usize,
    pub service_errors: usize,
    pub result_write_errors: usize,
}

impl ProcessReport {
    /// Items that ended this run without a result record.
    pub fn unresolved(&self) -> usize {
        self.classify_errors + self.skip_write_errors + self.service_errors + self.result_write_errors
    }

    /// Failed writes to the Result Store. Anything above zero points at the
    /// storage, not the service.
    pub fn store_failures(&self) -> usize {
        self.skip_write_errors + self.result_write_errors
    }
}

/// Process every unresolved corpus item once.
pub async fn process(
    corpus: &Corpus,
    store: &ResultStore,
    classifier: Arc<dyn FrameClassifier>,
    backend: Arc<dyn InferenceBackend>,
    settings: &ProcessSettings,
) -> Result<ProcessReport, DeskwatchError> {
    let corpus_items = corpus.scan()?;
    let stored = store.ids()?;

    tracing::info!(
        images = corpus_items.len(),
        outputs = stored.len(),
        corpus = %corpus.dir().display(),
        results = %store.dir().display(),
        "Scanned corpus and result store"
    );

    let work = resolver::resolve(&corpus_items, &stored, settings.batch_cap)?;

    let mut report = ProcessReport {
        corpus_items: corpus_items.len(),
        stored_before: stored.len(),
        pending: work.total_pending,
        selected: work.len(),
        ..ProcessReport::default()
    };

    if work.is_empty() {
        tracing::info!("Nothing to process, every corpus item has a result");
        return Ok(report);
    }

    tracing::info!(
        pending = work.total_pending,
        selected = work.len(),
        "Images to process"
    );

    let filtered = darkframe::run_filter_pool(work.items, classifier, settings.filter_workers).await;
    report.discarded = filtered.discard.len();
    report.kept = filtered.keep.len();
    report.classify_errors = filtered.failed.len();

    let skips = darkframe::write_skip_records(store, &filtered.discard);
    report.skip_write_errors = skips.failed.len();

    let dispatched =
        dispatch::run_dispatch_pool(filtered.keep, backend, store, settings.dispatch_workers).await;
    report.inferred = dispatched.inferred.len();
    report.service_errors = dispatched.service_errors.len();
    report.result_write_errors = dispatched.store_errors.len();

    tracing::info!(
        discarded = report.discarded,
        inferred = report.inferred,
        unresolved = report.unresolved(),
        "Processing run complete"
    );

    Ok(report)
}

/// Snapshot of corpus and store progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub corpus_items: usize,
    pub stored: usize,
    pub discarded: usize,
    pub inferred: usize,
    pub unreadable: usize,
    pub pending: usize,
    /// Stored records with no matching corpus image.
    pub orphaned: usize,
}

pub fn status(corpus: &Corpus, store: &ResultStore) -> Result<StatusReport, DeskwatchError> {
    let corpus_items = corpus.scan()?;
    let stored = store.ids()?;
    let work = resolver::resolve(&corpus_items, &stored, None)?;

    let mut report = StatusReport {
        corpus_items: corpus_items.len(),
        stored: stored.len(),
        pending: work.total_pending,
        ..StatusReport::default()
    };
    report.orphaned = stored.len() - (corpus_items.len() - work.total_pending);

    for (id, record) in store.read_all()? {
        match record {
            Ok(ResultRecord::Skipped { .. }) => report.discarded += 1,
            Ok(ResultRecord::Inference(_)) => report.inferred += 1,
            Err(e) => {
                tracing::debug!(id = %id, error = %e, "Unreadable result record");
                report.unreadable += 1;
            }
        }
    }

    Ok(report)
}

/// Status of a single item.
pub fn item_status(store: &ResultStore, id: &ItemId) -> Result<ItemStatus, DeskwatchError> {
    Ok(store.status_of(id)?)
}
