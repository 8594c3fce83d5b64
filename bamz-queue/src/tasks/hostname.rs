use super::params;
use crate::error::QueueResult;
use crate::job::JobData;
use crate::task::{TaskContext, TaskHandler};
use async_trait::async_trait;
use bamz_tenancy::HostnameCache;
use serde::Deserialize;
use std::sync::Arc;

/// Hosts arrive either as bare names or as `app_hostname` rows.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostEntry {
    Name(String),
    Row { hostname: String },
}

impl HostEntry {
    fn into_name(self) -> String {
        match self {
            HostEntry::Name(name) | HostEntry::Row { hostname: name } => name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostnameParams {
    database: String,
    #[serde(default, alias = "previous_hosts")]
    previous_hosts: Option<Vec<HostEntry>>,
    #[serde(default, alias = "new_hosts")]
    new_hosts: Option<Vec<HostEntry>>,
}

fn names(hosts: Option<Vec<HostEntry>>) -> Vec<String> {
    hosts
        .unwrap_or_default()
        .into_iter()
        .map(HostEntry::into_name)
        .collect()
}

/// Moves hostnames in the routing cache after `app_hostname` changes.
pub struct UpdateHostnameCache {
    hostnames: Arc<HostnameCache>,
}

impl UpdateHostnameCache {
    pub fn new(hostnames: Arc<HostnameCache>) -> Self {
        Self { hostnames }
    }
}

#[async_trait]
impl TaskHandler for UpdateHostnameCache {
    async fn run(&self, ctx: &TaskContext, payload: JobData) -> QueueResult<()> {
        let HostnameParams {
            database,
            previous_hosts,
            new_hosts,
        } = params(payload)?;
        ctx.logger()
            .info(format!("Update hostname of {}", database));

        self.hostnames
            .apply_update(&database, &names(previous_hosts), &names(new_hosts));
        Ok(())
    }
}
