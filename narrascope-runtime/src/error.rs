//! Error types for the background evaluation path.
//!
//! Nothing here ever reaches the narrative pipeline: the coordinator logs every
//! error and moves on.

use thiserror::Error;

/// Failure of one result sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote rejected score ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Failure inside one scheduled evaluation.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Evaluation panicked: {0}")]
    Panicked(String),

    #[error("{failed} of {total} sinks failed")]
    Sinks { failed: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display() {
        let err = SinkError::Rejected {
            status: 401,
            body: "invalid credentials".into(),
        };
        assert_eq!(
            err.to_string(),
            "Remote rejected score (401): invalid credentials"
        );
    }

    #[test]
    fn test_json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SinkError = json_err.into();
        assert!(matches!(err, SinkError::Serialization(_)));
    }
}
