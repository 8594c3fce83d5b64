//! The capability interface every plugin implements.

use crate::PluginResult;
use async_trait::async_trait;
use bamz_db::{CredentialSet, SqlExecutor};
use bamz_log::ScopedLogger;
use bamz_tenancy::{GrantLevel, PrivilegePlan};
use std::path::Path;
use std::sync::Arc;

/// A plugin extending tenant databases.
///
/// ```rust
/// use async_trait::async_trait;
/// use bamz_plugins::{Plugin, PluginResult, PrepareContext};
/// use bamz_tenancy::GrantLevel;
///
/// struct Billing;
///
/// #[async_trait]
/// impl Plugin for Billing {
///     fn id(&self) -> &str {
///         "billing"
///     }
///
///     fn dependencies(&self) -> Vec<String> {
///         vec!["accounts".to_string()]
///     }
///
///     async fn prepare_database(&self, ctx: &mut PrepareContext<'_>) -> PluginResult<()> {
///         ctx.connection
///             .batch_execute("CREATE SCHEMA IF NOT EXISTS billing;")
///             .await?;
///         ctx.grant_schema_access("billing", GrantLevel::Default).await
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier, recorded in `openbamz.plugins`.
    fn id(&self) -> &str;

    /// Ids of plugins that must be installed first.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Create or migrate the plugin's objects. Runs on every install and on
    /// every service start, so it must be re-runnable.
    async fn prepare_database(&self, ctx: &mut PrepareContext<'_>) -> PluginResult<()>;

    /// Remove the plugin's objects.
    async fn clean_database(&self, _ctx: &mut CleanContext<'_>) -> PluginResult<()> {
        Ok(())
    }

    /// Task handler at `path`, for `run-plugin-task` jobs.
    fn task(&self, _path: &str) -> Option<Arc<dyn PluginTask>> {
        None
    }
}

/// What a plugin gets while preparing a tenant database.
pub struct PrepareContext<'a> {
    /// Superuser connection to the tenant database
    pub connection: &'a mut dyn SqlExecutor,
    pub tenant: &'a str,
    /// Directory the plugin may keep files in
    pub files_directory: &'a Path,
    plan: PrivilegePlan,
}

impl<'a> PrepareContext<'a> {
    pub fn new(
        connection: &'a mut dyn SqlExecutor,
        tenant: &'a str,
        files_directory: &'a Path,
        plan: PrivilegePlan,
    ) -> Self {
        Self {
            connection,
            tenant,
            files_directory,
            plan,
        }
    }

    pub fn credentials(&self) -> &CredentialSet {
        self.connection.credentials()
    }

    /// Grant the tenant roles access to `schema` at `level`.
    pub async fn grant_schema_access(&mut self, schema: &str, level: GrantLevel) -> PluginResult<()> {
        let plan = self.plan.clone().level(schema, level)?;
        plan.apply(&mut *self.connection).await?;
        Ok(())
    }
}

/// What a plugin gets while cleaning up after itself.
pub struct CleanContext<'a> {
    pub connection: &'a mut dyn SqlExecutor,
    pub tenant: &'a str,
}

/// A plugin-defined background task.
#[async_trait]
pub trait PluginTask: Send + Sync {
    async fn run(&self, ctx: &mut TaskContext<'_>, params: serde_json::Value) -> PluginResult<()>;
}

/// What a plugin task gets when a worker runs it.
pub struct TaskContext<'a> {
    /// Database the job was queued in
    pub app_name: &'a str,
    pub connection: &'a mut dyn SqlExecutor,
    pub logger: ScopedLogger,
}
