use super::{TaskServices, params};
use crate::error::QueueResult;
use crate::job::JobData;
use crate::task::{TaskContext, TaskHandler};
use async_trait::async_trait;
use bamz_log::Level;
use bamz_plugins::PluginRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct PluginParams {
    plugin: String,
}

/// Installs a plugin, and its missing dependencies, in the job's database.
pub struct AddPlugin {
    services: Arc<TaskServices>,
}

impl AddPlugin {
    pub fn new(services: Arc<TaskServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl TaskHandler for AddPlugin {
    async fn run(&self, ctx: &TaskContext, payload: JobData) -> QueueResult<()> {
        let PluginParams { plugin } = params(payload)?;
        let database = ctx.current_database().await?;
        ctx.logger()
            .info(format!("Prepare plugin {} for {}", plugin, database));

        self.services.installer.install(&database, &plugin).await?;
        Ok(())
    }
}

/// Cleans a plugin out of the job's database.
pub struct RemovePlugin {
    services: Arc<TaskServices>,
}

impl RemovePlugin {
    pub fn new(services: Arc<TaskServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl TaskHandler for RemovePlugin {
    async fn run(&self, ctx: &TaskContext, payload: JobData) -> QueueResult<()> {
        let PluginParams { plugin } = params(payload)?;
        let database = ctx.current_database().await?;
        ctx.logger()
            .info(format!("Remove plugin {} from {}", plugin, database));

        self.services.installer.uninstall(&database, &plugin).await?;
        Ok(())
    }
}

/// Runs a task a plugin exposes, e.g. queued from a trigger with
/// `{"plugin": "backup", "task": "tasks/backup", "params": {...}}`.
///
/// Malformed requests are logged and dropped; a failing plugin task fails
/// the job so it is retried.
pub struct RunPluginTask {
    plugins: Arc<PluginRegistry>,
}

impl RunPluginTask {
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self { plugins }
    }
}

fn field<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| payload.get(*name))
        .filter(|value| !value.is_null())
}

#[async_trait]
impl TaskHandler for RunPluginTask {
    async fn run(&self, ctx: &TaskContext, payload: JobData) -> QueueResult<()> {
        let logger = ctx.logger();
        let dropped = |reason: &str| {
            logger.with_fields(
                Level::Error,
                reason,
                &[("payload", payload.to_string())],
            );
            Ok(())
        };

        let Some(plugin) = field(&payload, &["plugin"]).and_then(Value::as_str) else {
            return dropped("Missing plugin");
        };
        let Some(path) = field(&payload, &["task", "task_path"]).and_then(Value::as_str) else {
            return dropped("Missing task");
        };
        let Some(params) = field(&payload, &["params"]) else {
            return dropped("Missing params");
        };
        let Some(task) = self.plugins.task(plugin, path) else {
            return dropped("Can't get runner for plugin task");
        };

        let app_name = ctx.current_database().await?;
        let mut connection = ctx.connection().await?;
        let mut task_ctx = bamz_plugins::TaskContext {
            app_name: &app_name,
            connection: connection.as_mut(),
            logger: logger.child(plugin),
        };
        task.run(&mut task_ctx, params.clone()).await?;
        Ok(())
    }
}
