use thiserror::Error;

use crate::inference::ServiceError;
use crate::models::ItemId;
use crate::store::StoreError;

/// Corrupted inputs detected before any work starts.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("duplicate identity {id} in {origin}")]
    DuplicateIdentity { origin: &'static str, id: ItemId },
}

#[derive(Error, Debug)]
pub enum DeskwatchError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Data integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
