use super::{TaskServices, params};
use crate::error::QueueResult;
use crate::job::JobData;
use crate::task::{TaskContext, TaskHandler};
use async_trait::async_trait;
use bamz_db::checked_ident;
use bamz_tenancy::TENANT_BASE_SCHEMA;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct DatabaseParams {
    database: String,
}

/// Brings up the database, roles, privileges, directory and worker of a
/// newly registered app.
pub struct CreateDatabase {
    services: Arc<TaskServices>,
}

impl CreateDatabase {
    pub fn new(services: Arc<TaskServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl TaskHandler for CreateDatabase {
    async fn run(&self, ctx: &TaskContext, payload: JobData) -> QueueResult<()> {
        let DatabaseParams { database } = params(payload)?;
        let code = checked_ident(&database)?;
        let services = &self.services;
        ctx.logger().info(format!("Create database {}", code));

        let Some(account) = services.directory.owner_account(code).await? else {
            ctx.logger()
                .warn(format!("App {} not found, ignore database creation", code));
            return Ok(());
        };

        let credentials = services.engine.tenant_credentials(code);
        services.engine.ensure_database_exists(&credentials).await?;
        services
            .engine
            .apply_base_schema(&credentials, TENANT_BASE_SCHEMA)
            .await?;
        services.engine.bind_account_to_role(&account, code).await?;
        services.engine.prepare_privileges(code).await?;
        services.files.prepare(code).await?;

        ctx.workers().start(&credentials).await?;
        ctx.logger().info(format!("Database {} ready", code));
        Ok(())
    }
}

/// Removes an app's database, roles and directory and forgets every
/// cached trace of it.
pub struct DropDatabase {
    services: Arc<TaskServices>,
}

impl DropDatabase {
    pub fn new(services: Arc<TaskServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl TaskHandler for DropDatabase {
    async fn run(&self, ctx: &TaskContext, payload: JobData) -> QueueResult<()> {
        let DatabaseParams { database } = params(payload)?;
        let code = checked_ident(&database)?;
        let services = &self.services;
        ctx.logger().info(format!("Drop database {}", code));

        // The worker holds connections that would block the drop
        ctx.workers().stop(code).await;

        services.engine.drop_tenant(code).await?;
        services.files.delete(code).await?;

        services.hub.notify(code).await;
        let hosts = services.hostnames.remove_tenant(code);
        services.installer.membership().clear(code);

        ctx.logger()
            .info(format!("Database {} dropped, {} hostnames released", code, hosts));
        Ok(())
    }
}
