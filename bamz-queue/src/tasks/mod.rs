//! Built-in tasks.
//!
//! | task | payload |
//! |---|---|
//! | `create-database` | `{database}` |
//! | `drop-database` | `{database}` |
//! | `add-plugin` / `remove-plugin` | `{plugin}` |
//! | `update-hostname-cache` | `{database, previousHosts, newHosts}` |
//! | `run-plugin-task` | `{plugin, task, params}` |

mod database;
mod hostname;
mod plugin;

pub use database::{CreateDatabase, DropDatabase};
pub use hostname::UpdateHostnameCache;
pub use plugin::{AddPlugin, RemovePlugin, RunPluginTask};

use crate::error::QueueResult;
use crate::job::JobData;
use crate::task::TaskRegistry;
use bamz_plugins::PluginInstaller;
use bamz_tenancy::{
    HostnameCache, InvalidationHub, ProvisioningEngine, TenantDirectory, TenantFiles,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub const CREATE_DATABASE: &str = "create-database";
pub const DROP_DATABASE: &str = "drop-database";
pub const ADD_PLUGIN: &str = "add-plugin";
pub const REMOVE_PLUGIN: &str = "remove-plugin";
pub const UPDATE_HOSTNAME_CACHE: &str = "update-hostname-cache";
pub const RUN_PLUGIN_TASK: &str = "run-plugin-task";

/// Shared platform components the built-in tasks act on.
pub struct TaskServices {
    pub engine: ProvisioningEngine,
    pub installer: Arc<PluginInstaller>,
    pub directory: TenantDirectory,
    pub files: TenantFiles,
    pub hostnames: Arc<HostnameCache>,
    /// Caches holding per-tenant state (the schema-service registry)
    pub hub: Arc<InvalidationHub>,
}

/// Register every built-in task in `tasks`.
pub fn register_builtin_tasks(tasks: &TaskRegistry, services: Arc<TaskServices>) {
    tasks.register(CREATE_DATABASE, Arc::new(CreateDatabase::new(services.clone())));
    tasks.register(DROP_DATABASE, Arc::new(DropDatabase::new(services.clone())));
    tasks.register(ADD_PLUGIN, Arc::new(AddPlugin::new(services.clone())));
    tasks.register(REMOVE_PLUGIN, Arc::new(RemovePlugin::new(services.clone())));
    tasks.register(
        UPDATE_HOSTNAME_CACHE,
        Arc::new(UpdateHostnameCache::new(services.hostnames.clone())),
    );
    tasks.register(
        RUN_PLUGIN_TASK,
        Arc::new(RunPluginTask::new(services.installer.plugins().clone())),
    );
}

fn params<T: DeserializeOwned>(payload: JobData) -> QueueResult<T> {
    Ok(serde_json::from_value(payload)?)
}
