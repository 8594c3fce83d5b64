//! Per-tenant plugin installation.

use crate::{
    CleanContext, MembershipCache, Plugin, PluginError, PluginRegistry, PluginResult,
    PrepareContext, sort_by_dependency,
};
use bamz_log::{debug, info, warn};
use bamz_tenancy::{InvalidationHub, ProvisioningEngine, TenantFiles};
use std::collections::BTreeSet;
use std::sync::Arc;

const INSTALLED: &str =
    "SELECT plugin_id::text AS plugin_id FROM openbamz.plugins ORDER BY installed_at, plugin_id";
const RECORD: &str = "INSERT INTO openbamz.plugins(plugin_id) VALUES ($1) ON CONFLICT DO NOTHING";
const FORGET: &str = "DELETE FROM openbamz.plugins WHERE plugin_id = $1";

/// Installs, removes and re-prepares plugins in tenant databases.
pub struct PluginInstaller {
    engine: ProvisioningEngine,
    plugins: Arc<PluginRegistry>,
    membership: Arc<MembershipCache>,
    files: TenantFiles,
    hub: Arc<InvalidationHub>,
}

impl PluginInstaller {
    pub fn new(
        engine: ProvisioningEngine,
        plugins: Arc<PluginRegistry>,
        membership: Arc<MembershipCache>,
        files: TenantFiles,
        hub: Arc<InvalidationHub>,
    ) -> Self {
        Self {
            engine,
            plugins,
            membership,
            files,
            hub,
        }
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn membership(&self) -> &Arc<MembershipCache> {
        &self.membership
    }

    /// Caches told about installs and removals.
    pub fn hub(&self) -> &Arc<InvalidationHub> {
        &self.hub
    }

    /// Plugin ids recorded in the tenant database, in install order.
    pub async fn installed(&self, code: &str) -> PluginResult<Vec<String>> {
        let mut connection = self
            .engine
            .connections()
            .acquire(&self.engine.tenant_credentials(code))
            .await?;
        let rows = connection.fetch_rows(INSTALLED, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("plugin_id").map(str::to_string))
            .collect())
    }

    /// Re-run the preparation of every installed plugin, dependencies
    /// first. Plugins caught in a dependency cycle are skipped.
    pub async fn prepare_all(&self, code: &str) -> PluginResult<Vec<String>> {
        let mut known = Vec::new();
        for id in self.installed(code).await? {
            match self.plugins.get(&id) {
                Some(plugin) => known.push(plugin),
                None => warn!(target: "bamz::plugins", "Plugin {} installed in {} is not registered", id, code),
            }
        }

        let outcome = sort_by_dependency(&known);
        let mut prepared = Vec::with_capacity(outcome.sorted.len());
        for plugin in &outcome.sorted {
            self.prepare(code, plugin.as_ref()).await?;
            prepared.push(plugin.id().to_string());
        }
        Ok(prepared)
    }

    /// Install `plugin_id` and any missing dependencies, then invalidate
    /// the tenant's caches. Unknown plugins are ignored with a warning.
    ///
    /// Caches are invalidated even when a plugin fails, since dependencies
    /// installed before the failure stay installed.
    pub async fn install(&self, code: &str, plugin_id: &str) -> PluginResult<()> {
        self.membership.clear(code);

        if !self.plugins.contains(plugin_id) {
            warn!(target: "bamz::plugins", "Cannot install unknown plugin {} in {}", plugin_id, code);
            return Ok(());
        }

        let result = self.install_missing(code, plugin_id).await;
        self.invalidate(code).await;
        result
    }

    /// Clean up and forget `plugin_id`, then invalidate the tenant's caches,
    /// whether or not the cleanup succeeded.
    pub async fn uninstall(&self, code: &str, plugin_id: &str) -> PluginResult<()> {
        self.membership.clear(code);
        let result = self.remove(code, plugin_id).await;
        self.invalidate(code).await;
        result
    }

    async fn install_missing(&self, code: &str, plugin_id: &str) -> PluginResult<()> {
        let installed: BTreeSet<String> = self.installed(code).await?.into_iter().collect();
        let order = self.install_order(plugin_id, &installed)?;

        for plugin in &order {
            info!(target: "bamz::plugins", "Installing plugin {} in {}", plugin.id(), code);
            self.prepare(code, plugin.as_ref()).await?;
            let mut connection = self
                .engine
                .connections()
                .acquire(&self.engine.tenant_credentials(code))
                .await?;
            connection.execute(RECORD, &[plugin.id()]).await?;
        }
        Ok(())
    }

    async fn remove(&self, code: &str, plugin_id: &str) -> PluginResult<()> {
        let credentials = self.engine.tenant_credentials(code);
        let mut connection = self.engine.connections().acquire(&credentials).await?;
        match self.plugins.get(plugin_id) {
            Some(plugin) => {
                info!(target: "bamz::plugins", "Removing plugin {} from {}", plugin_id, code);
                let mut ctx = CleanContext {
                    connection: connection.as_mut(),
                    tenant: code,
                };
                plugin.clean_database(&mut ctx).await?;
            }
            None => warn!(target: "bamz::plugins", "Removing unregistered plugin {} from {}", plugin_id, code),
        }
        connection.execute(FORGET, &[plugin_id]).await?;
        Ok(())
    }

    async fn invalidate(&self, code: &str) {
        self.membership.clear(code);
        self.hub.notify(code).await;
    }

    /// Missing dependencies of `plugin_id` (post-order), then the plugin.
    fn install_order(
        &self,
        plugin_id: &str,
        installed: &BTreeSet<String>,
    ) -> PluginResult<Vec<Arc<dyn Plugin>>> {
        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        let mut path = Vec::new();
        self.visit(plugin_id, installed, &mut path, &mut done, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        id: &str,
        installed: &BTreeSet<String>,
        path: &mut Vec<String>,
        done: &mut BTreeSet<String>,
        order: &mut Vec<Arc<dyn Plugin>>,
    ) -> PluginResult<()> {
        if done.contains(id) {
            return Ok(());
        }
        if path.iter().any(|p| p == id) {
            let mut cycle = path.clone();
            cycle.push(id.to_string());
            return Err(PluginError::DependencyCycle(cycle));
        }

        let plugin = self
            .plugins
            .get(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;

        path.push(id.to_string());
        for dep in plugin.dependencies() {
            if installed.contains(&dep) {
                continue;
            }
            debug!(target: "bamz::plugins", "Plugin {} needs {}", id, dep);
            self.visit(&dep, installed, path, done, order)?;
        }
        path.pop();

        done.insert(id.to_string());
        order.push(plugin);
        Ok(())
    }

    async fn prepare(&self, code: &str, plugin: &dyn Plugin) -> PluginResult<()> {
        let files_directory = self.files.files_directory(code)?;
        let plan = self.engine.plan(code)?;
        let mut connection = self
            .engine
            .connections()
            .acquire(&self.engine.tenant_credentials(code))
            .await?;

        let mut ctx = PrepareContext::new(connection.as_mut(), code, &files_directory, plan);
        plugin.prepare_database(&mut ctx).await
    }
}

impl std::fmt::Debug for PluginInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstaller")
            .field("plugins", &self.plugins)
            .field("files", &self.files)
            .finish()
    }
}
