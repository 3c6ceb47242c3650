//! Durable match → chain/application mapping with an enforced submission life cycle.

mod mapping;
mod store;

pub use mapping::{MappingStatus, MatchMapping};
pub use store::{
    MATCH_MAPPING_PATH_ENV, MappingTable, MatchMappingStore, default_mapping_path,
    read_snapshot,
};

use std::{io, path::PathBuf};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("mapping file {path:?} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}
