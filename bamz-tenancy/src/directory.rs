//! Lookups against the platform database.

use crate::{Tenant, TenantResult};
use bamz_db::{ConnectionProvider, CredentialSet, DbResult};
use std::sync::Arc;

const OWNER_ACCOUNT: &str = "SELECT acc._id::text AS account_id FROM app a \
     JOIN private.account acc ON a.owner = acc._id WHERE a.code = $1";
const ALL_CODES: &str = "SELECT code::text AS code FROM app ORDER BY code";
const HOSTNAMES: &str = "SELECT hostname::text AS hostname, app::text AS app FROM app_hostname";
const SET_ROLE: &str = "SELECT set_config('role', $1, true) AS set_config";
const APP_VISIBLE: &str = "SELECT code::text AS code FROM app WHERE code = $1";

/// Read access to apps, accounts and hostnames.
#[derive(Clone)]
pub struct TenantDirectory {
    connections: Arc<dyn ConnectionProvider>,
    platform: CredentialSet,
}

impl TenantDirectory {
    pub fn new(connections: Arc<dyn ConnectionProvider>, platform: CredentialSet) -> Self {
        Self {
            connections,
            platform,
        }
    }

    /// Account owning the app `code`, if any.
    pub async fn owner_account(&self, code: &str) -> DbResult<Option<String>> {
        let mut connection = self.connections.acquire(&self.platform).await?;
        let row = connection.fetch_optional(OWNER_ACCOUNT, &[code]).await?;
        Ok(row.and_then(|row| row.get("account_id").map(str::to_string)))
    }

    /// Every registered app code, sorted.
    pub async fn all_codes(&self) -> DbResult<Vec<String>> {
        let mut connection = self.connections.acquire(&self.platform).await?;
        let rows = connection.fetch_rows(ALL_CODES, &[]).await?;
        rows.iter()
            .map(|row| row.require("code").map(str::to_string))
            .collect()
    }

    /// `(hostname, app code)` pairs.
    pub async fn hostnames(&self) -> DbResult<Vec<(String, String)>> {
        let mut connection = self.connections.acquire(&self.platform).await?;
        let rows = connection.fetch_rows(HOSTNAMES, &[]).await?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.require("hostname")?.to_string(),
                    row.require("app")?.to_string(),
                ))
            })
            .collect()
    }

    /// The app `code` with its owner and hostnames.
    pub async fn tenant(&self, code: &str) -> TenantResult<Tenant> {
        let mut tenant = Tenant::new(code)?;
        tenant.owner = self.owner_account(code).await?;
        tenant.hostnames = self
            .hostnames()
            .await?
            .into_iter()
            .filter(|(_, app)| app == code)
            .map(|(host, _)| host)
            .collect();
        Ok(tenant)
    }

    /// Whether `role` can see the app row of `code`.
    ///
    /// Runs in a transaction that is always rolled back, so the role switch
    /// never leaks into the pooled connection.
    pub async fn role_can_see(&self, code: &str, role: &str) -> DbResult<bool> {
        let mut connection = self.connections.acquire(&self.platform).await?;
        connection.execute("BEGIN", &[]).await?;

        let visible = match connection.fetch_rows(SET_ROLE, &[role]).await {
            Ok(_) => connection.fetch_optional(APP_VISIBLE, &[code]).await,
            Err(e) => Err(e),
        };

        connection.execute("ROLLBACK", &[]).await?;
        Ok(visible?.is_some())
    }

    pub fn platform_credentials(&self) -> &CredentialSet {
        &self.platform
    }
}
