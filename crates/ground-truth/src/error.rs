use thiserror::Error;

pub type Result<T> = std::result::Result<T, GtError>;

#[derive(Error, Debug)]
pub enum GtError {
    #[error("Invalid trigger pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("{0}")]
    Other(String),
}
