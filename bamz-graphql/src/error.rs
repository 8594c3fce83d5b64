//! Schema-service errors.

use bamz_db::DbError;
use bamz_plugins::PluginError;
use bamz_tenancy::TenantError;

#[derive(Debug, thiserror::Error)]
pub enum GraphQLError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Timed out waiting for {0} to be prepared")]
    InitTimeout(String),

    #[error("Schema service error: {0}")]
    Service(String),

    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl GraphQLError {
    /// HTTP status a front end should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            GraphQLError::Unauthorized(_) => 401,
            GraphQLError::Forbidden(_) => 403,
            GraphQLError::Tenant(TenantError::NotFound(_)) => 404,
            GraphQLError::Tenant(TenantError::Invalid(_)) => 400,
            GraphQLError::InitTimeout(_) => 503,
            _ => 500,
        }
    }
}

pub type GraphQLResult<T> = Result<T, GraphQLError>;
