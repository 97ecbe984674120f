//! Error taxonomy for stage handlers.

use thiserror::Error;

use super::state::FailureKind;

/// Failure reported by a stage handler or capability.
///
/// Transient errors (rate limiting, network failures, malformed
/// provider responses) are retried per the backoff policy until
/// exhaustion. Permanent errors (missing prerequisite data, deleted
/// referents) fail the job immediately.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        StageError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StageError::Permanent(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::Transient(_) => FailureKind::Transient,
            StageError::Permanent(_) => FailureKind::Permanent,
        }
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        StageError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_retry_behaviour() {
        assert_eq!(
            StageError::transient("timeout").kind(),
            FailureKind::Transient
        );
        assert_eq!(
            StageError::permanent("row deleted").kind(),
            FailureKind::Permanent
        );
    }
}
