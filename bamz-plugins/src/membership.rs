//! Memoized "is plugin X installed in tenant T" lookups.

use bamz_db::{ConnectionProvider, CredentialSet, DbResult};
use bamz_log::info;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

const PLUGIN_INSTALLED: &str =
    "SELECT plugin_id::text AS plugin_id FROM openbamz.plugins WHERE plugin_id = $1";

/// Tenant name used by the platform's own front end; it never has plugins.
const PLATFORM_APP: &str = "app";

#[derive(Default)]
struct Entries {
    answers: HashMap<String, HashMap<String, bool>>,
    /// Bumped by every clear of the tenant; outlives its answers.
    generations: HashMap<String, u64>,
    /// Bumped by `clear_all`.
    epoch: u64,
}

impl Entries {
    fn stamp(&self, tenant: &str) -> (u64, u64) {
        (self.epoch, self.generations.get(tenant).copied().unwrap_or_default())
    }
}

/// Per `(tenant, plugin)` answers, cleared on every install and uninstall.
///
/// A lookup that overlaps a clear of its tenant is answered but not
/// remembered.
pub struct MembershipCache {
    connections: Arc<dyn ConnectionProvider>,
    superuser: CredentialSet,
    entries: RwLock<Entries>,
}

impl MembershipCache {
    /// `superuser` points at the platform database.
    pub fn new(connections: Arc<dyn ConnectionProvider>, superuser: CredentialSet) -> Self {
        Self {
            connections,
            superuser,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Whether `plugin` is installed in `tenant`. Lookup failures count as
    /// "not installed" and are not remembered.
    pub async fn has_plugin(&self, tenant: &str, plugin: &str) -> bool {
        if tenant == self.superuser.database() || tenant == PLATFORM_APP {
            return false;
        }
        let (known, stamp) = {
            let entries = self.entries.read();
            let known = entries
                .answers
                .get(tenant)
                .and_then(|plugins| plugins.get(plugin))
                .copied();
            (known, entries.stamp(tenant))
        };
        if let Some(known) = known {
            return known;
        }

        match self.lookup(tenant, plugin).await {
            Ok(installed) => {
                let mut entries = self.entries.write();
                if entries.stamp(tenant) == stamp {
                    entries
                        .answers
                        .entry(tenant.to_string())
                        .or_default()
                        .insert(plugin.to_string(), installed);
                }
                installed
            }
            Err(e) => {
                info!(
                    target: "bamz::plugins",
                    "Plugin lookup of {} in {} failed, assuming not installed: {}",
                    plugin,
                    tenant,
                    e
                );
                false
            }
        }
    }

    async fn lookup(&self, tenant: &str, plugin: &str) -> DbResult<bool> {
        let credentials = self.superuser.with_database(tenant);
        let mut connection = self.connections.acquire(&credentials).await?;
        Ok(connection
            .fetch_optional(PLUGIN_INSTALLED, &[plugin])
            .await?
            .is_some())
    }

    /// Forget every answer for `tenant`.
    pub fn clear(&self, tenant: &str) {
        let mut entries = self.entries.write();
        entries.answers.remove(tenant);
        *entries.generations.entry(tenant.to_string()).or_default() += 1;
    }

    pub fn clear_all(&self) {
        let mut entries = self.entries.write();
        entries.answers.clear();
        entries.epoch += 1;
    }

    /// Number of remembered answers for `tenant`.
    pub fn cached(&self, tenant: &str) -> usize {
        self.entries
            .read()
            .answers
            .get(tenant)
            .map_or(0, HashMap::len)
    }
}
