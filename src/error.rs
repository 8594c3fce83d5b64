//! Errors surfaced by the platform facade.

use bamz_config::ConfigError;
use bamz_db::DbError;
use bamz_graphql::GraphQLError;
use bamz_plugins::PluginError;
use bamz_queue::QueueError;
use bamz_tenancy::TenantError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BamzError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Tenant error: {0}")]
    Tenant(#[from] TenantError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("GraphQL error: {0}")]
    GraphQL(#[from] GraphQLError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl BamzError {
    /// The cluster is unreachable; the process should not carry on.
    pub fn is_fatal(&self) -> bool {
        match self {
            BamzError::Database(e) => e.is_connection_refused(),
            BamzError::Tenant(e) => e.is_fatal(),
            BamzError::Queue(e) => e.is_fatal(),
            BamzError::GraphQL(GraphQLError::Database(e)) => e.is_connection_refused(),
            BamzError::GraphQL(GraphQLError::Tenant(e)) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BamzError>;
