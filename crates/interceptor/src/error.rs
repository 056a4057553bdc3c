use thiserror::Error;

pub type Result<T> = std::result::Result<T, InterceptorError>;

#[derive(Error, Debug)]
pub enum InterceptorError {
    #[error("Route operation failed: {0}")]
    RouteError(String),

    #[error("Invalid block pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
