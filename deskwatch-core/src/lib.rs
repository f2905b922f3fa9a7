pub mod config;
pub mod corpus;
pub mod error;
pub mod inference;
pub mod models;
pub mod store;

pub use config::DeskwatchConfig;
pub use corpus::{Corpus, CorpusItem};
pub use error::{DeskwatchError, IntegrityError};
pub use inference::{InferenceBackend, ServiceError, WorkflowClient, WorkflowConfig};
pub use models::{ItemId, ItemStatus, ResultRecord};
pub use store::{ResultStore, StoreError};
