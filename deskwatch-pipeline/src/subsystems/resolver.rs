//! Work Set Resolver: which corpus items still need a result.
//!
//! Pure set difference between the corpus and the Result Store. Items that
//! failed in an earlier run left no record, so they reappear here without
//! any bookkeeping.

use deskwatch_core::{CorpusItem, IntegrityError, ItemId};
use std::collections::HashSet;

/// Items selected for this run.
#[derive(Debug, Clone, Default)]
pub struct WorkSet {
    /// Sorted by identity, capped to the batch size.
    pub items: Vec<CorpusItem>,
    /// Unresolved items before the cap was applied.
    pub total_pending: usize,
}

impl WorkSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Compute `corpus - stored`, oldest first, optionally capped to `batch_cap`.
///
/// Fails before selecting anything if either side lists an identity twice.
pub fn resolve(
    corpus: &[CorpusItem],
    stored: &[ItemId],
    batch_cap: Option<usize>,
) -> Result<WorkSet, IntegrityError> {
    let corpus_ids = unique_ids(corpus.iter().map(|item| &item.id), "corpus")?;
    let stored_ids = unique_ids(stored.iter(), "result store")?;

    let mut pending: Vec<CorpusItem> = corpus
        .iter()
        .filter(|item| !stored_ids.contains(&item.id))
        .cloned()
        .collect();
    pending.sort_by(|a, b| a.id.cmp(&b.id));

    let total_pending = pending.len();
    if let Some(cap) = batch_cap {
        pending.truncate(cap);
    }

    tracing::debug!(
        corpus = corpus_ids.len(),
        stored = stored_ids.len(),
        pending = total_pending,
        selected = pending.len(),
        "Resolved work set"
    );

    Ok(WorkSet {
        items: pending,
        total_pending,
    })
}

fn unique_ids<'a>(
    ids: impl Iterator<Item = &'a ItemId>,
    origin: &'static str,
) -> Result<HashSet<&'a ItemId>, IntegrityError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(IntegrityError::DuplicateIdentity {
                origin,
                id: id.clone(),
            });
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn item(id: &str) -> CorpusItem {
        CorpusItem {
            id: ItemId::from(id),
            path: PathBuf::from(format!("images/{}.jpg", id)),
        }
    }

    fn ids(work: &WorkSet) -> Vec<&str> {
        work.items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_resolve_is_set_difference_in_sorted_order() {
        let corpus = vec![
            item("2024-03-02T14-00-40"),
            item("2024-03-02T14-00-00"),
            item("2024-03-02T14-00-20"),
        ];
        let stored = vec![ItemId::from("2024-03-02T14-00-20")];

        let work = resolve(&corpus, &stored, None).unwrap();
        assert_eq!(ids(&work), vec!["2024-03-02T14-00-00", "2024-03-02T14-00-40"]);
        assert_eq!(work.total_pending, 2);
    }

    #[test]
    fn test_everything_stored_yields_empty_work_set() {
        let corpus = vec![item("a"), item("b")];
        let stored = vec![ItemId::from("a"), ItemId::from("b"), ItemId::from("orphan")];
        let work = resolve(&corpus, &stored, None).unwrap();
        assert!(work.is_empty());
        assert_eq!(work.total_pending, 0);
    }

    #[test]
    fn test_batch_cap_takes_oldest_first() {
        let corpus: Vec<CorpusItem> = (0..10).rev().map(|i| item(&format!("t{:02}", i))).collect();
        let work = resolve(&corpus, &[], Some(3)).unwrap();
        assert_eq!(ids(&work), vec!["t00", "t01", "t02"]);
        assert_eq!(work.total_pending, 10);
        assert_eq!(work.len(), 3);
    }

    #[test]
    fn test_duplicate_corpus_identity_is_integrity_error() {
        let mut dup = item("2024-03-02T14-00-00");
        dup.path = PathBuf::from("images/2024-03-02T14-00-00.png");
        let corpus = vec![item("2024-03-02T14-00-00"), dup];

        let err = resolve(&corpus, &[], None).unwrap_err();
        assert_eq!(
            err,
            IntegrityError::DuplicateIdentity {
                origin: "corpus",
                id: ItemId::from("2024-03-02T14-00-00"),
            }
        );
    }

    #[test]
    fn test_duplicate_stored_identity_is_integrity_error() {
        let stored = vec![ItemId::from("x"), ItemId::from("x")];
        assert!(matches!(
            resolve(&[item("y")], &stored, None),
            Err(IntegrityError::DuplicateIdentity { origin: "result store", .. })
        ));
    }
}
