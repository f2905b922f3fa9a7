//! Inference dispatch: sends every surviving frame to the inference backend
//! and persists the raw payload.
//!
//! Each task writes only its own `{id}.json`, so workers never contend.
//! Writes run on the blocking pool, off the threads driving requests. A
//! failed call or write is recorded against its item and leaves no result;
//! the next run retries it.

use deskwatch_core::{CorpusItem, InferenceBackend, ItemId, ResultStore, ServiceError, StoreError};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::PROGRESS_EVERY;

/// What happened to one dispatched item.
#[derive(Debug)]
pub enum DispatchResult {
    Inferred,
    ServiceFailed(ServiceError),
    StoreFailed(StoreError),
}

/// Per-item results of one dispatch pass, each list sorted by identity.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub inferred: Vec<ItemId>,
    pub service_errors: Vec<(ItemId, ServiceError)>,
    pub store_errors: Vec<(ItemId, StoreError)>,
}

impl DispatchOutcome {
    pub fn total(&self) -> usize {
        self.inferred.len() + self.service_errors.len() + self.store_errors.len()
    }
}

/// Infer and persist one item.
pub async fn dispatch_one(
    item: &CorpusItem,
    backend: &dyn InferenceBackend,
    store: &ResultStore,
) -> DispatchResult {
    let payload = match backend.infer(&item.path).await {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(
                id = %item.id,
                backend = backend.name(),
                timeout = e.is_timeout(),
                error = %e,
                "Inference request failed"
            );
            return DispatchResult::ServiceFailed(e);
        }
    };

    let target = store.path_for(&item.id);
    let written = {
        let store = store.clone();
        let id = item.id.clone();
        tokio::task::spawn_blocking(move || store.write(&id, &payload))
            .await
            .unwrap_or_else(|e| {
                Err(StoreError::Io {
                    path: target,
                    source: std::io::Error::other(e),
                })
            })
    };

    match written {
        Ok(path) => {
            tracing::debug!(id = %item.id, path = %path.display(), "Stored inference result");
            DispatchResult::Inferred
        }
        Err(e) => {
            tracing::error!(id = %item.id, error = %e, "Failed to persist inference result");
            DispatchResult::StoreFailed(e)
        }
    }
}

/// Dispatch every item with at most `workers` requests in flight.
///
/// Completes once every task has finished; one slow or failing request
/// only delays or fails its own item.
pub async fn run_dispatch_pool(
    items: Vec<CorpusItem>,
    backend: Arc<dyn InferenceBackend>,
    store: &ResultStore,
    workers: usize,
) -> DispatchOutcome {
    let total = items.len();
    let completed = Arc::new(AtomicUsize::new(0));

    tracing::info!(
        items = total,
        workers,
        backend = backend.name(),
        "Sending inference requests"
    );

    let results: Vec<(ItemId, DispatchResult)> = stream::iter(items)
        .map(|item| {
            let backend = Arc::clone(&backend);
            let completed = Arc::clone(&completed);
            async move {
                let result = dispatch_one(&item, backend.as_ref(), store).await;

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_EVERY == 0 || done == total {
                    tracing::info!(progress = format!("{}/{}", done, total), "Dispatch progress");
                }

                (item.id, result)
            }
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    let mut outcome = DispatchOutcome::default();
    for (id, result) in results {
        match result {
            DispatchResult::Inferred => outcome.inferred.push(id),
            DispatchResult::ServiceFailed(e) => outcome.service_errors.push((id, e)),
            DispatchResult::StoreFailed(e) => outcome.store_errors.push((id, e)),
        }
    }
    outcome.inferred.sort();
    outcome.service_errors.sort_by(|a, b| a.0.cmp(&b.0));
    outcome.store_errors.sort_by(|a, b| a.0.cmp(&b.0));

    tracing::info!(
        success = outcome.inferred.len(),
        errors = outcome.service_errors.len(),
        store_errors = outcome.store_errors.len(),
        "Inference pool complete"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::path::Path;
    use std::time::Duration;

    /// Backend that answers every frame, except those listed in `failing`.
    struct MockBackend {
        failing: HashSet<String>,
        delay: Option<(String, Duration)>,
        calls: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                failing: HashSet::new(),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(ids: &[&str]) -> Self {
            Self {
                failing: ids.iter().map(|s| s.to_string()).collect(),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl InferenceBackend for MockBackend {
        async fn infer(&self, image: &Path) -> Result<Value, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stem = image.file_stem().unwrap().to_str().unwrap().to_string();
            if let Some((slow, delay)) = &self.delay {
                if *slow == stem {
                    tokio::time::sleep(*delay).await;
                }
            }
            if self.failing.contains(&stem) {
                return Err(ServiceError::Api {
                    code: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(json!([{ "person_count": 1, "is_at_desk": ["true (0.9)"], "source": stem }]))
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn items(n: usize) -> Vec<CorpusItem> {
        (0..n)
            .map(|i| CorpusItem {
                id: ItemId::new(format!("2024-03-02T14-{:02}-00", i)),
                path: format!("images/2024-03-02T14-{:02}-00.jpg", i).into(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_one_failure_among_fifty_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let backend = Arc::new(MockBackend::failing(&["2024-03-02T14-17-00"]));

        let outcome = run_dispatch_pool(items(50), backend.clone(), &store, 10).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 50);
        assert_eq!(outcome.inferred.len(), 49);
        assert_eq!(outcome.service_errors.len(), 1);
        assert_eq!(outcome.service_errors[0].0.as_str(), "2024-03-02T14-17-00");
        assert_eq!(store.ids().unwrap().len(), 49);
        assert!(!store.exists(&ItemId::from("2024-03-02T14-17-00")));
    }

    #[tokio::test]
    async fn test_payload_is_persisted_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let backend = MockBackend::new();
        let batch = items(1);
        let item = &batch[0];

        let result = dispatch_one(item, &backend, &store).await;
        assert!(matches!(result, DispatchResult::Inferred));
        let raw = store.read_raw(&item.id).unwrap();
        assert_eq!(raw[0]["source"], item.id.as_str());
    }

    #[tokio::test]
    async fn test_existing_record_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let batch = items(1);
        let item = &batch[0];
        store.write(&item.id, &json!({ "person_count": 0 })).unwrap();

        let result = dispatch_one(item, &MockBackend::new(), &store).await;
        assert!(matches!(
            result,
            DispatchResult::StoreFailed(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.read_raw(&item.id).unwrap()["person_count"], 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writes_from_wide_pool_on_multi_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let backend = Arc::new(MockBackend::new());

        let outcome = run_dispatch_pool(items(40), backend, &store, 16).await;

        assert_eq!(outcome.inferred.len(), 40);
        assert!(outcome.store_errors.is_empty());
        assert_eq!(store.ids().unwrap().len(), 40);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_slow_item_completes_alongside_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let backend = Arc::new(MockBackend {
            delay: Some(("2024-03-02T14-00-00".to_string(), Duration::from_millis(200))),
            ..MockBackend::new()
        });

        let outcome = run_dispatch_pool(items(8), backend, &store, 2).await;
        assert_eq!(outcome.inferred.len(), 8);
        assert_eq!(outcome.total(), 8);
        assert_eq!(outcome.inferred[0].as_str(), "2024-03-02T14-00-00");
    }
}
