//! Result Store: one JSON file per item in the result directory.
//!
//! The presence of `{id}.json` is the only "already processed" marker the
//! pipeline has, so records are written once and never replaced. Writes land
//! in a hidden `.partial` sibling first and are renamed into place, which
//! keeps an interrupted write from looking like a finished record.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::corpus::list_stems;
use crate::models::{ItemId, ItemStatus, RecordError, ResultRecord};

const RECORD_EXT: &str = "json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result for {0} already exists")]
    AlreadyExists(ItemId),

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, record).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    writer.flush().map_err(|e| StoreError::io(path, e))
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &ItemId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXT))
    }

    pub fn exists(&self, id: &ItemId) -> bool {
        self.path_for(id).is_file()
    }

    /// Identities of every stored record, sorted.
    pub fn ids(&self) -> Result<Vec<ItemId>, StoreError> {
        let mut ids: Vec<ItemId> = list_stems(&self.dir, &[RECORD_EXT.to_string()])
            .map_err(|e| StoreError::io(&self.dir, e))?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Persist `record` for `id`. Fails if a record already exists.
    pub fn write<T: Serialize + ?Sized>(&self, id: &ItemId, record: &T) -> Result<PathBuf, StoreError> {
        let path = self.path_for(id);
        if path.exists() {
            return Err(StoreError::AlreadyExists(id.clone()));
        }

        let partial = self.dir.join(format!(".{}.{}.partial", id, RECORD_EXT));
        let result = write_json(&partial, record)
            .and_then(|()| fs::rename(&partial, &path).map_err(|e| StoreError::io(&path, e)));
        if let Err(e) = result {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        tracing::debug!(id = %id, path = %path.display(), "Wrote result record");
        Ok(path)
    }

    /// Raw stored document, exactly as persisted.
    pub fn read_raw(&self, id: &ItemId) -> Result<Value, StoreError> {
        let path = self.path_for(id);
        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Json { path, source: e })
    }

    /// Stored record, normalized.
    pub fn read(&self, id: &ItemId) -> Result<ResultRecord, StoreError> {
        let raw = self.read_raw(id)?;
        Ok(ResultRecord::normalize(id, raw)?)
    }

    /// Lazily read every record in identity order.
    ///
    /// Listing failures are returned up front; per-record read or parse
    /// failures are yielded alongside the identity they belong to.
    pub fn read_all(
        &self,
    ) -> Result<impl Iterator<Item = (ItemId, Result<ResultRecord, StoreError>)> + '_, StoreError> {
        let ids = self.ids()?;
        Ok(ids.into_iter().map(move |id| {
            let record = self.read(&id);
            (id, record)
        }))
    }

    pub fn status_of(&self, id: &ItemId) -> Result<ItemStatus, StoreError> {
        if !self.exists(id) {
            return Ok(ItemStatus::Unseen);
        }
        Ok(match self.read(id)? {
            ResultRecord::Skipped { .. } => ItemStatus::Discarded,
            ResultRecord::Inference(_) => ItemStatus::Inferred,
        })
    }
}
