//! Tenant errors.

use bamz_db::DbError;

/// Errors raised while provisioning or looking up tenants.
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Invalid tenant identifier: {0}")]
    Invalid(String),

    #[error("Unknown schema definition: {0}")]
    UnknownSchema(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl TenantError {
    /// The cluster refused the connection; retrying will not help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TenantError::Database(e) if e.is_connection_refused())
    }
}

pub type TenantResult<T> = Result<T, TenantError>;
