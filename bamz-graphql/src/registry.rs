//! Dynamic Schema-Service Registry.
//!
//! One [`ServiceHandle`] per tenant, built on first use. A per-tenant
//! "initializing" flag makes provisioning single-flight: the caller that
//! sets the flag provisions, everybody else polls until the handle shows up
//! or the flag clears. The flag is cleared by a guard, so a failed or
//! panicking attempt never blocks later callers.

use crate::service::{SchemaServiceFactory, ServiceHandle, ServiceSpec};
use crate::{GraphQLConfig, GraphQLError, GraphQLResult};
use async_trait::async_trait;
use bamz_log::{debug, info, warn};
use bamz_plugins::PluginInstaller;
use bamz_tenancy::{
    ProvisioningEngine, TenantCacheInvalidator, TenantDirectory, TenantError, validate_code,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const EXISTING_SCHEMAS: &str = "SELECT schema_name::text AS schema_name FROM information_schema.schemata";

/// Prefix stripped from plugin ids to get their schema name.
pub const PLUGIN_ID_PREFIX: &str = "open-bamz-";

/// Schemas a tenant service exposes: `public` and `openbamz`, then one per
/// installed plugin whose schema exists, in install order.
pub fn plugin_schemas(installed: &[String], existing: &[String]) -> Vec<String> {
    let mut schemas = vec!["public".to_string(), "openbamz".to_string()];
    for id in installed {
        let schema = id.replace(PLUGIN_ID_PREFIX, "");
        if existing.contains(&schema) && !schemas.contains(&schema) {
            schemas.push(schema);
        }
    }
    schemas
}

/// Polling behavior of callers that find a tenant being provisioned.
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    /// Single-database deployment
    pub mono_database: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            wait_timeout: Duration::from_secs(60),
            mono_database: false,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    services: HashMap<String, Arc<ServiceHandle>>,
    initializing: HashSet<String>,
}

struct RegistryInner {
    engine: ProvisioningEngine,
    installer: Arc<PluginInstaller>,
    directory: TenantDirectory,
    factory: Arc<dyn SchemaServiceFactory>,
    options: RegistryOptions,
    state: Mutex<RegistryState>,
}

/// Clears the initializing flag of a tenant when dropped.
struct InitGuard {
    inner: Arc<RegistryInner>,
    code: String,
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        self.inner.state.lock().initializing.remove(&self.code);
    }
}

/// Per-tenant cache of schema services.
#[derive(Clone)]
pub struct SchemaServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl SchemaServiceRegistry {
    pub fn new(
        engine: ProvisioningEngine,
        installer: Arc<PluginInstaller>,
        directory: TenantDirectory,
        factory: Arc<dyn SchemaServiceFactory>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                engine,
                installer,
                directory,
                factory,
                options,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// The ready service of `code`, provisioning the tenant on a miss.
    pub async fn get_service(&self, code: &str) -> GraphQLResult<Arc<ServiceHandle>> {
        validate_code(code)?;

        let guard = match self.acquire(code).await? {
            Acquired::Ready(handle) => return Ok(handle),
            Acquired::Locked(guard) => guard,
        };

        // Provisioning runs detached: a caller that stops waiting does not
        // cancel it for everybody else.
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let guard = guard;
            inner.provision(&guard.code).await
        });
        task.await
            .map_err(|e| GraphQLError::Service(format!("provisioning task failed: {}", e)))?
    }

    /// Release and forget the service of `code`, waiting for an in-flight
    /// provisioning first.
    pub async fn invalidate(&self, code: &str) {
        let guard = match self.acquire_lock(code).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(target: "bamz::registry", "Cannot invalidate {}: {}", code, e);
                return;
            }
        };

        let handle = self.inner.state.lock().services.remove(code);
        if let Some(handle) = handle {
            info!(target: "bamz::registry", "Releasing schema service of {}", code);
            handle.release().await;
        }
        drop(guard);
    }

    /// Whether a service of `code` is cached.
    pub fn is_cached(&self, code: &str) -> bool {
        self.inner.state.lock().services.contains_key(code)
    }

    /// Whether `code` is being provisioned right now.
    pub fn is_initializing(&self, code: &str) -> bool {
        self.inner.state.lock().initializing.contains(code)
    }

    /// Codes with a cached service, sorted.
    pub fn cached_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.inner.state.lock().services.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().services.is_empty()
    }

    async fn acquire(&self, code: &str) -> GraphQLResult<Acquired> {
        let deadline = Instant::now() + self.inner.options.wait_timeout;
        loop {
            {
                let mut state = self.inner.state.lock();
                if let Some(handle) = state.services.get(code) {
                    return Ok(Acquired::Ready(handle.clone()));
                }
                if state.initializing.insert(code.to_string()) {
                    return Ok(Acquired::Locked(self.guard(code)));
                }
            }
            self.wait(code, deadline).await?;
        }
    }

    async fn acquire_lock(&self, code: &str) -> GraphQLResult<InitGuard> {
        let deadline = Instant::now() + self.inner.options.wait_timeout;
        loop {
            if self.inner.state.lock().initializing.insert(code.to_string()) {
                return Ok(self.guard(code));
            }
            self.wait(code, deadline).await?;
        }
    }

    async fn wait(&self, code: &str, deadline: Instant) -> GraphQLResult<()> {
        if Instant::now() >= deadline {
            return Err(GraphQLError::InitTimeout(code.to_string()));
        }
        debug!(target: "bamz::registry", "{} is being prepared, waiting", code);
        tokio::time::sleep(self.inner.options.poll_interval).await;
        Ok(())
    }

    fn guard(&self, code: &str) -> InitGuard {
        InitGuard {
            inner: self.inner.clone(),
            code: code.to_string(),
        }
    }
}

enum Acquired {
    Ready(Arc<ServiceHandle>),
    Locked(InitGuard),
}

impl RegistryInner {
    async fn provision(&self, code: &str) -> GraphQLResult<Arc<ServiceHandle>> {
        if self.directory.owner_account(code).await?.is_none() {
            return Err(TenantError::NotFound(code.to_string()).into());
        }

        info!(target: "bamz::registry", "Preparing schema service of {}", code);
        self.engine.provision_tenant(code).await?;
        let installed = self.installer.prepare_all(code).await?;

        let credentials = self.engine.tenant_credentials(code);
        let existing: Vec<String> = {
            let mut connection = self.engine.connections().acquire(&credentials).await?;
            connection
                .fetch_rows(EXISTING_SCHEMAS, &[])
                .await?
                .iter()
                .filter_map(|row| row.get("schema_name").map(str::to_string))
                .collect()
        };

        let config = if self.options.mono_database {
            GraphQLConfig::mono(code)
        } else {
            GraphQLConfig::for_tenant(code)
        };
        let spec = ServiceSpec {
            code: code.to_string(),
            credentials,
            schemas: plugin_schemas(&installed, &existing),
            config,
        };
        let service = self.factory.build(spec.clone()).await?;
        let handle = Arc::new(ServiceHandle::new(spec, service));

        self.state
            .lock()
            .services
            .insert(code.to_string(), handle.clone());
        Ok(handle)
    }
}

#[async_trait]
impl TenantCacheInvalidator for SchemaServiceRegistry {
    async fn invalidate_tenant(&self, code: &str) {
        self.invalidate(code).await;
    }
}

impl std::fmt::Debug for SchemaServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaServiceRegistry")
            .field("cached", &self.cached_codes())
            .field("options", &self.inner.options)
            .finish()
    }
}
