//! The tagged outcome of one ground-truth lookup.

use serde_json::Value;

/// Outcome of collecting ground truth for one subtask.
///
/// The variants split along two axes that scoring depends on: whether a
/// value was produced, and when not, whether the evaluation itself is
/// still valid. `NotCollected` is a valid evaluation with score 0 (the
/// agent did not gather the data); `SystemError` is an infrastructure
/// fault that invalidates the run. `Retryable` only appears transiently
/// inside the fetch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum GroundTruthResult {
    Ok(Value),
    Retryable(String),
    NotCollected(String),
    SystemError(String),
}

impl GroundTruthResult {
    pub fn ok(value: impl Into<Value>) -> Self {
        Self::Ok(value.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }

    /// Whether this outcome invalidates the evaluation run.
    pub fn invalidates_evaluation(&self) -> bool {
        matches!(self, Self::SystemError(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Retryable(reason) | Self::NotCollected(reason) | Self::SystemError(reason) => {
                Some(reason)
            }
        }
    }
}
