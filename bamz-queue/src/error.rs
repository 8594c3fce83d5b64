//! Error types for queue operations.

use bamz_db::DbError;
use bamz_plugins::PluginError;
use bamz_tenancy::TenantError;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Tenant error: {0}")]
    Tenant(#[from] TenantError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Payload could not be encoded or decoded
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// No handler registered for the task name
    #[error("No handler registered for task: {0}")]
    NoHandler(String),

    #[error("Task failed: {0}")]
    ExecutionFailed(String),

    #[error("Worker already running for {0}")]
    WorkerAlreadyRunning(String),

    #[error("Worker not running for {0}")]
    WorkerNotRunning(String),

    /// Operation timeout
    #[error("Job timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl QueueError {
    /// Whether the error means the cluster itself is gone.
    pub fn is_fatal(&self) -> bool {
        match self {
            QueueError::Database(e) => e.is_connection_refused(),
            QueueError::Tenant(e) => e.is_fatal(),
            QueueError::Plugin(PluginError::Database(e)) => e.is_connection_refused(),
            QueueError::Plugin(PluginError::Tenant(e)) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Payload(err.to_string())
    }
}
