//! Task handlers and what they get to work with.

use crate::error::QueueResult;
use crate::job::JobData;
use crate::supervisor::WorkerControl;
use async_trait::async_trait;
use bamz_db::{ConnectionProvider, CredentialSet, SqlExecutor, SqlRow};
use bamz_log::ScopedLogger;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Canonical kebab-case form of a task name (`createDatabase` becomes
/// `create-database`).
pub fn normalize_task_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.trim().chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('-') {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '_' {
            out.push('-');
        } else {
            out.push(c);
        }
    }
    out
}

/// Everything a task handler may touch while running a job.
///
/// Cheap to clone; each job gets its own copy.
#[derive(Clone)]
pub struct TaskContext {
    connections: Arc<dyn ConnectionProvider>,
    credentials: CredentialSet,
    logger: ScopedLogger,
    workers: WorkerControl,
}

impl TaskContext {
    pub fn new(
        connections: Arc<dyn ConnectionProvider>,
        credentials: CredentialSet,
        workers: WorkerControl,
    ) -> Self {
        let logger = ScopedLogger::new(format!("bamz::worker::{}", credentials.database()));
        Self {
            connections,
            credentials,
            logger,
            workers,
        }
    }

    /// Database whose queue the job came from.
    pub fn database(&self) -> &str {
        self.credentials.database()
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    pub fn connections(&self) -> &Arc<dyn ConnectionProvider> {
        &self.connections
    }

    pub fn logger(&self) -> &ScopedLogger {
        &self.logger
    }

    /// Start and stop workers for other databases.
    pub fn workers(&self) -> &WorkerControl {
        &self.workers
    }

    /// Borrow a connection to the job's database.
    pub async fn connection(&self) -> QueueResult<Box<dyn SqlExecutor>> {
        Ok(self.connections.acquire(&self.credentials).await?)
    }

    /// Run a query against the job's database.
    pub async fn query(&self, sql: &str, params: &[&str]) -> QueueResult<Vec<SqlRow>> {
        let mut connection = self.connection().await?;
        Ok(connection.fetch_rows(sql, params).await?)
    }

    /// Run a statement against the job's database.
    pub async fn execute(&self, sql: &str, params: &[&str]) -> QueueResult<u64> {
        let mut connection = self.connection().await?;
        Ok(connection.execute(sql, params).await?)
    }

    /// Name of the database the connection actually points at.
    pub async fn current_database(&self) -> QueueResult<String> {
        let rows = self
            .query("SELECT current_database() AS dbname", &[])
            .await?;
        match rows.first().and_then(|row| row.get("dbname")) {
            Some(name) => Ok(name.to_string()),
            None => Ok(self.database().to_string()),
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("database", &self.database())
            .finish()
    }
}

/// Runs jobs of one task name.
///
/// Delivery is at-least-once: a job may run again after a crash or a
/// timeout, so handlers must tolerate reruns.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: &TaskContext, payload: JobData) -> QueueResult<()>;
}

/// A [`TaskHandler`] backed by an async closure.
pub struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnTask<F>
where
    F: Fn(TaskContext, JobData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = QueueResult<()>> + Send + 'static,
{
    async fn run(&self, ctx: &TaskContext, payload: JobData) -> QueueResult<()> {
        (self.0)(ctx.clone(), payload).await
    }
}

/// Handlers keyed by normalized task name.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: RwLock<BTreeMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .write()
            .insert(normalize_task_name(name), handler);
    }

    /// Register an async closure as the handler for `name`.
    ///
    /// ```
    /// use bamz_queue::TaskRegistry;
    ///
    /// let tasks = TaskRegistry::new();
    /// tasks.register_fn("send-report", |ctx, _payload| async move {
    ///     ctx.logger().info("report sent");
    ///     Ok(())
    /// });
    /// assert!(tasks.get("sendReport").is_some());
    /// ```
    pub fn register_fn<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(TaskContext, JobData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        self.register(name, Arc::new(FnTask(handler)));
    }

    /// Handler for `name`, in kebab-case or camelCase.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(&normalize_task_name(name)).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_task_name() {
        assert_eq!(normalize_task_name("createDatabase"), "create-database");
        assert_eq!(normalize_task_name("updateHostnameCache"), "update-hostname-cache");
        assert_eq!(normalize_task_name("drop-database"), "drop-database");
        assert_eq!(normalize_task_name("run_plugin_task"), "run-plugin-task");
    }

    #[test]
    fn test_registry_accepts_both_spellings() {
        let tasks = TaskRegistry::new();
        tasks.register_fn("addPlugin", |_ctx, _payload| async { Ok(()) });

        assert!(tasks.get("add-plugin").is_some());
        assert!(tasks.get("addPlugin").is_some());
        assert!(tasks.get("remove-plugin").is_none());
        assert_eq!(tasks.names(), vec!["add-plugin".to_string()]);
    }
}
