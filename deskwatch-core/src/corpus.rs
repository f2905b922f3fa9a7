//! Read-only view over the capture directory.

use std::io;
use std::path::{Path, PathBuf};

use crate::models::ItemId;

/// One captured frame on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusItem {
    pub id: ItemId,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Corpus {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl Corpus {
    pub fn new(dir: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            dir: dir.into(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every image in the corpus, sorted by identity.
    ///
    /// Duplicate identities (e.g. `x.jpg` next to `x.JPG`) are returned as-is;
    /// rejecting them is the resolver's job.
    pub fn scan(&self) -> io::Result<Vec<CorpusItem>> {
        let mut items: Vec<CorpusItem> = list_stems(&self.dir, &self.extensions)?
            .into_iter()
            .map(|(id, path)| CorpusItem { id, path })
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));
        Ok(items)
    }
}

/// `(stem, path)` for every regular, non-hidden file in `dir` whose
/// extension matches one of `extensions` (case-insensitive).
pub(crate) fn list_stems(dir: &Path, extensions: &[String]) -> io::Result<Vec<(ItemId, PathBuf)>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        if stem.starts_with('.') {
            continue;
        }
        let ext = ext.to_ascii_lowercase();
        if extensions.iter().any(|e| *e == ext) {
            found.push((ItemId::new(stem), path.clone()));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_filters_by_extension_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2024-03-02T14-07-40.jpg"), b"x").unwrap();
        fs::write(dir.path().join("2024-03-02T14-07-00.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join(".hidden.jpg"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested.jpg")).unwrap();

        let corpus = Corpus::new(dir.path(), &["jpg".to_string()]);
        let items = corpus.scan().unwrap();

        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["2024-03-02T14-07-00", "2024-03-02T14-07-40"]);
        assert_eq!(items[0].path, dir.path().join("2024-03-02T14-07-00.jpg"));
    }

    #[test]
    fn test_scan_reports_duplicate_stems_across_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2024-03-02T14-07-40.jpg"), b"x").unwrap();
        fs::write(dir.path().join("2024-03-02T14-07-40.png"), b"x").unwrap();

        let corpus = Corpus::new(dir.path(), &["jpg".to_string(), ".PNG".to_string()]);
        let items = corpus.scan().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, items[1].id);
    }

    #[test]
    fn test_scan_missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::new(dir.path().join("absent"), &["jpg".to_string()]);
        assert!(corpus.scan().is_err());
    }
}
