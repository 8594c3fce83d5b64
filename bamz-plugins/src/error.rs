//! Plugin errors.

use bamz_db::DbError;
use bamz_tenancy::TenantError;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Circular plugin dependency: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Plugin {plugin} failed: {message}")]
    Failed { plugin: String, message: String },

    #[error("Plugin task {0} not found")]
    TaskNotFound(String),

    #[error("Tenant error: {0}")]
    Tenant(#[from] TenantError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl PluginError {
    pub fn failed(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        PluginError::Failed {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;
