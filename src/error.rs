use axum::http::StatusCode;
use thiserror::Error;

/// Failures on the session-ingest path. Fail-fast per request: one bad
/// payload never affects others.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid payload: {0}")]
    Validation(String),

    #[error("unknown workspace {0}")]
    InvalidWorkspace(String),

    #[error("{0}")]
    BadAction(String),

    #[error("event buffer insert failed: {0}")]
    Buffer(#[source] anyhow::Error),

    #[error("control-plane error: {0}")]
    ControlPlane(#[from] anyhow::Error),
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) | IngestError::BadAction(_) => StatusCode::BAD_REQUEST,
            IngestError::InvalidWorkspace(_) => StatusCode::NOT_FOUND,
            IngestError::Buffer(_) | IngestError::ControlPlane(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Failures on the backfill control and processing paths.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown workspace {0}")]
    InvalidWorkspace(String),

    #[error("a backfill task is already active for workspace {0}")]
    ConflictingTask(String),

    #[error("task {0} is already in a terminal state")]
    AlreadyTerminal(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("store error: {0}")]
    TransientStore(#[from] clickhouse::error::Error),

    #[error("could not acquire mutation capacity for {database} within {timeout_ms}ms")]
    CapacityTimeout { database: String, timeout_ms: u64 },

    #[error("mutations on {database}.{table} did not finish within {timeout_ms}ms")]
    MutationTimeout {
        database: String,
        table: String,
        timeout_ms: u64,
    },

    #[error("task cancelled")]
    Cancelled,

    #[error("control-plane error: {0}")]
    ControlPlane(#[from] anyhow::Error),
}

impl BackfillError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BackfillError::Validation(_) | BackfillError::AlreadyTerminal(_) => {
                StatusCode::BAD_REQUEST
            }
            BackfillError::InvalidWorkspace(_) | BackfillError::TaskNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            BackfillError::ConflictingTask(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_error_status_mapping() {
        assert_eq!(
            IngestError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            IngestError::BadAction("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            IngestError::InvalidWorkspace("w".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn backfill_error_status_mapping() {
        assert_eq!(
            BackfillError::ConflictingTask("w".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BackfillError::AlreadyTerminal("t".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BackfillError::TaskNotFound("t".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
