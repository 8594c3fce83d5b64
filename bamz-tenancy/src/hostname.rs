//! Hostname to tenant routing cache.

use crate::TenantDirectory;
use bamz_db::DbResult;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Maps custom hostnames to tenant codes.
#[derive(Debug, Default)]
pub struct HostnameCache {
    hosts: RwLock<HashMap<String, String>>,
}

impl HostnameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenant serving `hostname`, ignoring case.
    pub fn resolve(&self, hostname: &str) -> Option<String> {
        self.hosts.read().get(&hostname.to_lowercase()).cloned()
    }

    pub fn set(&self, hostname: &str, code: &str) {
        self.hosts
            .write()
            .insert(hostname.to_lowercase(), code.to_string());
    }

    pub fn remove(&self, hostname: &str) -> Option<String> {
        self.hosts.write().remove(&hostname.to_lowercase())
    }

    /// Replace `previous` hostnames of `database` with `new` ones.
    pub fn apply_update(&self, database: &str, previous: &[String], new: &[String]) {
        let mut hosts = self.hosts.write();
        for host in previous {
            hosts.remove(&host.to_lowercase());
        }
        for host in new {
            hosts.insert(host.to_lowercase(), database.to_string());
        }
    }

    /// Drop every hostname pointing at `code`. Returns how many were removed.
    pub fn remove_tenant(&self, code: &str) -> usize {
        let mut hosts = self.hosts.write();
        let before = hosts.len();
        hosts.retain(|_, app| app != code);
        before - hosts.len()
    }

    /// Replace the cache with the platform's hostname table.
    pub async fn load(&self, directory: &TenantDirectory) -> DbResult<usize> {
        let rows = directory.hostnames().await?;
        let mut hosts = self.hosts.write();
        hosts.clear();
        for (host, app) in rows {
            hosts.insert(host.to_lowercase(), app);
        }
        Ok(hosts.len())
    }

    /// Hostnames of `code`, sorted.
    pub fn hostnames_of(&self, code: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .hosts
            .read()
            .iter()
            .filter(|(_, app)| *app == code)
            .map(|(host, _)| host.clone())
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }
}
