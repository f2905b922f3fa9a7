//! Dark-frame filter: keeps nighttime captures away from the inference service.
//!
//! Frames taken with the lights off are close to uniformly black, so their
//! pixel intensities have a tiny standard deviation. Each candidate is
//! classified on the blocking thread pool; discarded frames get a skip record
//! so they are never picked up again.

use chrono::Utc;
use deskwatch_core::models::SkipRecord;
use deskwatch_core::{CorpusItem, ItemId, ResultStore, StoreError};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::PROGRESS_EVERY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Discard,
    Keep,
}

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image {path} has no pixels")]
    Empty { path: PathBuf },

    #[error("Classifier task failed: {0}")]
    Worker(String),
}

/// Decides whether a frame is worth sending to inference.
///
/// Implementations are CPU-bound and run on the blocking pool.
pub trait FrameClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> Result<Verdict, ClassificationError>;
}

/// Discards frames whose intensity standard deviation is below `threshold`.
#[derive(Debug, Clone)]
pub struct StdDevClassifier {
    threshold: f64,
}

impl StdDevClassifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl FrameClassifier for StdDevClassifier {
    fn classify(&self, path: &Path) -> Result<Verdict, ClassificationError> {
        let decode_err = |source: image::ImageError| ClassificationError::Decode {
            path: path.to_path_buf(),
            source,
        };
        // Format comes from the file content, not its extension.
        let img = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| decode_err(image::ImageError::IoError(e)))?
            .decode()
            .map_err(decode_err)?;
        let rgb = img.to_rgb8();
        let std_dev = intensity_std_dev(rgb.as_raw()).ok_or_else(|| ClassificationError::Empty {
            path: path.to_path_buf(),
        })?;

        tracing::trace!(path = %path.display(), std_dev, "Classified frame");

        Ok(if std_dev < self.threshold {
            Verdict::Discard
        } else {
            Verdict::Keep
        })
    }
}

/// Population standard deviation over every channel sample.
pub fn intensity_std_dev(samples: &[u8]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let (sum, sum_sq) = samples.iter().fold((0u64, 0u64), |(s, sq), &v| {
        let v = v as u64;
        (s + v, sq + v * v)
    });
    let mean = sum as f64 / n;
    let variance = (sum_sq as f64 / n - mean * mean).max(0.0);
    Some(variance.sqrt())
}

/// Disjoint result sets of one filter pass, each sorted by identity.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub discard: Vec<CorpusItem>,
    pub keep: Vec<CorpusItem>,
    pub failed: Vec<(ItemId, ClassificationError)>,
}

/// Classify every candidate with at most `workers` frames in flight.
///
/// A failing frame never affects its siblings; it lands in `failed` and is
/// left without a result so the next run retries it.
pub async fn run_filter_pool(
    items: Vec<CorpusItem>,
    classifier: Arc<dyn FrameClassifier>,
    workers: usize,
) -> FilterOutcome {
    let total = items.len();
    let completed = Arc::new(AtomicUsize::new(0));

    tracing::info!(items = total, workers, "Evaluating frames for darkness");

    let results: Vec<(CorpusItem, Result<Verdict, ClassificationError>)> = stream::iter(items)
        .map(|item| {
            let classifier = Arc::clone(&classifier);
            let completed = Arc::clone(&completed);
            async move {
                let path = item.path.clone();
                let verdict = tokio::task::spawn_blocking(move || classifier.classify(&path))
                    .await
                    .map_err(|e| ClassificationError::Worker(e.to_string()))
                    .and_then(|r| r);

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_EVERY == 0 || done == total {
                    tracing::info!(progress = format!("{}/{}", done, total), "Filter progress");
                }

                (item, verdict)
            }
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut outcome = FilterOutcome::default();
    for (item, verdict) in results {
        match verdict {
            Ok(Verdict::Discard) => outcome.discard.push(item),
            Ok(Verdict::Keep) => outcome.keep.push(item),
            Err(e) => {
                tracing::warn!(id = %item.id, error = %e, "Failed to classify frame");
                outcome.failed.push((item.id, e));
            }
        }
    }
    outcome.discard.sort_by(|a, b| a.id.cmp(&b.id));
    outcome.keep.sort_by(|a, b| a.id.cmp(&b.id));
    outcome.failed.sort_by(|a, b| a.0.cmp(&b.0));

    tracing::info!(
        discard = outcome.discard.len(),
        keep = outcome.keep.len(),
        errors = outcome.failed.len(),
        "Frame evaluation complete"
    );

    outcome
}

/// Skip-record writes after the pool has drained.
#[derive(Debug, Default)]
pub struct SkipWrites {
    pub written: usize,
    pub failed: Vec<(ItemId, StoreError)>,
}

/// Persist a skip record for every discarded frame.
pub fn write_skip_records(store: &ResultStore, discard: &[CorpusItem]) -> SkipWrites {
    let eval_time = Utc::now();
    let mut writes = SkipWrites::default();

    for item in discard {
        let record = SkipRecord::new(item.id.clone(), eval_time);
        match store.write(&item.id, &record) {
            Ok(_) => writes.written += 1,
            Err(e) => {
                tracing::error!(id = %item.id, error = %e, "Failed to write skip record");
                writes.failed.push((item.id.clone(), e));
            }
        }
    }

    tracing::info!(
        written = writes.written,
        discarded = discard.len(),
        "Wrote skip records for dark frames"
    );

    writes
}
