//! One worker per database.

use crate::error::QueueResult;
use crate::queue::PgJobQueue;
use crate::task::{TaskContext, TaskRegistry};
use crate::worker::{Worker, WorkerConfig};
use bamz_db::{ConnectionProvider, CredentialSet};
use bamz_log::{error, info};
use bamz_tenancy::TenantDirectory;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

struct SupervisorInner {
    connections: Arc<dyn ConnectionProvider>,
    platform: CredentialSet,
    tasks: Arc<TaskRegistry>,
    config: WorkerConfig,
    workers: Mutex<BTreeMap<String, Worker>>,
}

impl SupervisorInner {
    async fn start(self: &Arc<Self>, credentials: &CredentialSet) -> QueueResult<bool> {
        let database = credentials.database().to_string();
        if self.workers.lock().contains_key(&database) {
            return Ok(false);
        }

        // Fails fast when the database or the cluster is missing
        self.connections.probe(credentials).await?;

        let mut workers = self.workers.lock();
        if workers.contains_key(&database) {
            return Ok(false);
        }

        let queue = Arc::new(
            PgJobQueue::new(self.connections.clone(), credentials.clone())
                .with_lock_timeout(self.config.lock_timeout),
        );
        let context = TaskContext::new(
            self.connections.clone(),
            credentials.clone(),
            WorkerControl {
                inner: Arc::downgrade(self),
            },
        );
        let mut worker = Worker::new(queue, self.tasks.clone(), context, self.config.clone());
        worker.start()?;
        workers.insert(database, worker);
        Ok(true)
    }

    async fn stop(&self, database: &str) -> bool {
        let worker = self.workers.lock().remove(database);
        match worker {
            Some(mut worker) => {
                // Only errors when already stopped
                let _ = worker.stop().await;
                true
            }
            None => false,
        }
    }
}

/// Starts, tracks and stops the per-database workers.
///
/// Cloning yields another handle to the same set of workers.
#[derive(Clone)]
pub struct WorkerSupervisor {
    inner: Arc<SupervisorInner>,
}

impl WorkerSupervisor {
    /// `platform` is the superuser on the platform database; tenant workers
    /// use the same login against their own database.
    pub fn new(
        connections: Arc<dyn ConnectionProvider>,
        platform: CredentialSet,
        tasks: Arc<TaskRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                connections,
                platform,
                tasks,
                config,
                workers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.inner.tasks
    }

    /// Start a worker for `credentials`. Returns `false` when one is
    /// already running for that database.
    pub async fn start(&self, credentials: &CredentialSet) -> QueueResult<bool> {
        self.inner.start(credentials).await
    }

    /// Start the platform worker, then one worker per app.
    ///
    /// A platform worker failure is returned; tenant failures are logged
    /// and skipped. Returns the number of workers running afterwards.
    pub async fn start_all(&self, directory: &TenantDirectory) -> QueueResult<usize> {
        self.start(&self.inner.platform).await?;

        for code in directory.all_codes().await? {
            let credentials = self.inner.platform.with_database(code.as_str());
            match self.start(&credentials).await {
                Ok(true) => info!(target: "bamz::supervisor", "Started worker for {}", code),
                Ok(false) => {}
                Err(e) => error!(
                    target: "bamz::supervisor",
                    kv: [("database", &code), ("error", &e)],
                    "Could not start worker"
                ),
            }
        }
        Ok(self.len())
    }

    /// Stop the worker of `database`. Returns whether one was running.
    pub async fn stop(&self, database: &str) -> bool {
        self.inner.stop(database).await
    }

    pub async fn stop_all(&self) {
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for (_, mut worker) in workers {
            let _ = worker.stop().await;
        }
        info!(target: "bamz::supervisor", "All workers stopped");
    }

    pub fn is_running(&self, database: &str) -> bool {
        self.inner.workers.lock().contains_key(database)
    }

    /// Databases with a running worker.
    pub fn databases(&self) -> Vec<String> {
        self.inner.workers.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.workers.lock().is_empty()
    }

    /// A handle task handlers can use to start and stop workers.
    pub fn control(&self) -> WorkerControl {
        WorkerControl {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for WorkerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSupervisor")
            .field("databases", &self.databases())
            .finish()
    }
}

/// Weak handle to a [`WorkerSupervisor`], given to running tasks.
///
/// Does nothing once the supervisor is gone.
#[derive(Clone, Default)]
pub struct WorkerControl {
    inner: Weak<SupervisorInner>,
}

impl WorkerControl {
    /// A handle attached to no supervisor.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Start a worker for `credentials` if none is running yet.
    pub async fn start(&self, credentials: &CredentialSet) -> QueueResult<bool> {
        match self.inner.upgrade() {
            Some(inner) => inner.start(credentials).await,
            None => Ok(false),
        }
    }

    /// Stop the worker of `database`.
    pub async fn stop(&self, database: &str) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.stop(database).await,
            None => false,
        }
    }
}

impl std::fmt::Debug for WorkerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerControl")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use bamz_db::DbError;
    use bamz_testing::{PLATFORM_DB, SimulatedCluster, platform_cluster, platform_credentials};
    use std::time::Duration;

    fn supervisor(cluster: &SimulatedCluster) -> WorkerSupervisor {
        WorkerSupervisor::new(
            Arc::new(cluster.clone()),
            platform_credentials(),
            Arc::new(TaskRegistry::new()),
            WorkerConfig::default().with_poll_interval(Duration::from_millis(10)),
        )
    }

    fn directory(cluster: &SimulatedCluster) -> TenantDirectory {
        TenantDirectory::new(Arc::new(cluster.clone()), platform_credentials())
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let cluster = platform_cluster().with_database("shop1");
        let supervisor = supervisor(&cluster);
        let shop1 = SimulatedCluster::superuser("shop1");

        assert!(supervisor.start(&shop1).await.unwrap());
        assert!(!supervisor.start(&shop1).await.unwrap());
        assert_eq!(supervisor.databases(), vec!["shop1".to_string()]);

        assert!(supervisor.stop("shop1").await);
        assert!(!supervisor.stop("shop1").await);
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_start_all_skips_broken_tenants() {
        // `ghost` has an app row but no database
        let cluster = platform_cluster()
            .with_database("shop1")
            .with_app("shop1", "acc1")
            .with_app("ghost", "acc2");
        let supervisor = supervisor(&cluster);

        assert_eq!(supervisor.start_all(&directory(&cluster)).await.unwrap(), 2);
        assert!(supervisor.is_running(PLATFORM_DB));
        assert!(supervisor.is_running("shop1"));
        assert!(!supervisor.is_running("ghost"));

        supervisor.stop_all().await;
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_platform_worker_failure_is_fatal() {
        let cluster = platform_cluster().with_app("shop1", "acc1");
        cluster.set_reachable(false);
        let supervisor = supervisor(&cluster);

        let err = supervisor.start_all(&directory(&cluster)).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            QueueError::Database(DbError::ConnectionRefused { .. })
        ));
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_control_outlives_supervisor_safely() {
        let cluster = platform_cluster();
        let control = {
            let supervisor = supervisor(&cluster);
            let control = supervisor.control();
            assert!(control.is_attached());
            control
        };

        assert!(!control.is_attached());
        assert!(!control.start(&platform_credentials()).await.unwrap());
        assert!(!control.stop(PLATFORM_DB).await);
        assert!(!WorkerControl::detached().is_attached());
    }
}
