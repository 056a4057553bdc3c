use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdaterError>;

#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("Store error: {0}")]
    StoreError(#[from] replay_store::StoreError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Fetch failed: {0}")]
    FetchError(String),

    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(std::time::Duration),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Refresh failed for {source_name}: {reason}")]
    RefreshFailed { source_name: String, reason: String },

    #[error("{0}")]
    Other(String),
}
