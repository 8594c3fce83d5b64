//! The assembled orchestrator.

use crate::Result;
use bamz_config::PlatformConfig;
use bamz_db::{ConnectionProvider, CredentialSet, PoolOptions, PoolRegistry};
use bamz_graphql::{AccessGuard, RegistryOptions, SchemaServiceFactory, SchemaServiceRegistry, ServiceHandle};
use bamz_log::info;
use bamz_plugins::{MembershipCache, PluginInstaller, PluginRegistry};
use bamz_queue::{
    JobId, JobQueue, NewJob, PgJobQueue, TaskRegistry, TaskServices, WorkerConfig, WorkerSupervisor,
    register_builtin_tasks,
};
use bamz_tenancy::{
    HostnameCache, InvalidationHub, ProvisioningEngine, SchemaCatalog, TenantCacheInvalidator,
    TenantDirectory, TenantFiles,
};
use std::sync::Arc;

/// Every long-lived component, wired against one connection provider.
///
/// Holds the strong references the invalidation hub only sees weakly.
pub struct Platform {
    config: PlatformConfig,
    connections: Arc<dyn ConnectionProvider>,
    engine: ProvisioningEngine,
    installer: Arc<PluginInstaller>,
    registry: Arc<SchemaServiceRegistry>,
    directory: TenantDirectory,
    hostnames: Arc<HostnameCache>,
    guard: AccessGuard,
    tasks: Arc<TaskRegistry>,
    supervisor: WorkerSupervisor,
}

impl Platform {
    /// Platform backed by real Postgres pools.
    pub fn new(
        config: PlatformConfig,
        plugins: PluginRegistry,
        factory: Arc<dyn SchemaServiceFactory>,
    ) -> Self {
        let pools = Arc::new(PoolRegistry::new(PoolOptions::from(&config)));
        Self::with_connections(config, pools, plugins, factory)
    }

    pub fn with_connections(
        config: PlatformConfig,
        connections: Arc<dyn ConnectionProvider>,
        plugins: PluginRegistry,
        factory: Arc<dyn SchemaServiceFactory>,
    ) -> Self {
        let superuser = CredentialSet::from(&config.database);
        let engine = ProvisioningEngine::new(
            connections.clone(),
            superuser.clone(),
            SchemaCatalog::from_config(&config),
        );
        let membership = Arc::new(MembershipCache::new(connections.clone(), superuser.clone()));
        let files = TenantFiles::from_config(&config);
        let hub = Arc::new(InvalidationHub::new());
        let installer = Arc::new(PluginInstaller::new(
            engine.clone(),
            Arc::new(plugins),
            membership.clone(),
            files.clone(),
            hub.clone(),
        ));
        let directory = TenantDirectory::new(connections.clone(), superuser.clone());

        let registry = Arc::new(SchemaServiceRegistry::new(
            engine.clone(),
            installer.clone(),
            directory.clone(),
            factory,
            RegistryOptions {
                poll_interval: config.init_poll_interval,
                wait_timeout: config.init_wait_timeout,
                mono_database: config.mono_database,
            },
        ));
        let subscriber: Arc<dyn TenantCacheInvalidator> = registry.clone();
        hub.subscribe(subscriber);

        let hostnames = Arc::new(HostnameCache::new());
        let tasks = Arc::new(TaskRegistry::new());
        register_builtin_tasks(
            &tasks,
            Arc::new(TaskServices {
                engine: engine.clone(),
                installer: installer.clone(),
                directory: directory.clone(),
                files,
                hostnames: hostnames.clone(),
                hub,
            }),
        );

        let supervisor = WorkerSupervisor::new(
            connections.clone(),
            superuser,
            tasks.clone(),
            WorkerConfig::default()
                .with_concurrency(config.worker_concurrency)
                .with_poll_interval(config.worker_poll_interval),
        );

        Self {
            guard: AccessGuard::new(directory.clone(), membership),
            config,
            connections,
            engine,
            installer,
            registry,
            directory,
            hostnames,
            tasks,
            supervisor,
        }
    }

    /// Bring the platform database up and load the hostname table.
    pub async fn prepare(&self) -> Result<()> {
        self.engine.prepare_main_database().await?;
        let loaded = self.hostnames.load(&self.directory).await?;
        info!(target: "bamz::platform", "Platform ready, {} hostnames loaded", loaded);
        Ok(())
    }

    /// One worker for the platform database and one per tenant.
    pub async fn start_workers(&self) -> Result<usize> {
        Ok(self.supervisor.start_all(&self.directory).await?)
    }

    pub async fn stop_workers(&self) {
        self.supervisor.stop_all().await;
    }

    /// Stop workers and drop every cached service.
    pub async fn shutdown(&self) {
        self.stop_workers().await;
        for code in self.registry.cached_codes() {
            self.registry.invalidate(&code).await;
        }
        info!(target: "bamz::platform", "Platform stopped");
    }

    /// The tenant's schema service, provisioning it on first use.
    pub async fn service(&self, code: &str) -> Result<Arc<ServiceHandle>> {
        Ok(self.registry.get_service(code).await?)
    }

    /// Tenant code serving `hostname`.
    pub fn resolve_host(&self, hostname: &str) -> Option<String> {
        self.hostnames.resolve(hostname)
    }

    /// Queue a job in `database`'s job table.
    pub async fn enqueue(&self, database: &str, job: NewJob) -> Result<JobId> {
        let credentials = self.engine.tenant_credentials(database);
        let queue = PgJobQueue::new(self.connections.clone(), credentials);
        Ok(queue.enqueue(job).await?)
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn engine(&self) -> &ProvisioningEngine {
        &self.engine
    }

    pub fn installer(&self) -> &Arc<PluginInstaller> {
        &self.installer
    }

    pub fn registry(&self) -> &Arc<SchemaServiceRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &TenantDirectory {
        &self.directory
    }

    pub fn hostnames(&self) -> &Arc<HostnameCache> {
        &self.hostnames
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("database", &self.config.database.name)
            .field("services", &self.registry.len())
            .field("hostnames", &self.hostnames.len())
            .field("workers", &self.supervisor.len())
            .finish()
    }
}
