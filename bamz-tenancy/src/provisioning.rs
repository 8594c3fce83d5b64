//! Tenant Provisioning Engine.
//!
//! Brings a tenant database from "does not exist" to "fully privileged and
//! schema-ready". Every step checks before it acts, so a failed attempt is
//! recovered by running the engine again.

use crate::schema::{PLATFORM_SCHEMA, TENANT_BASE_SCHEMA};
use crate::tenant::PLATFORM_ADMIN_ROLE;
use crate::{GrantLevel, PrivilegePlan, SchemaCatalog, TenantResult, TenantRoles};
use bamz_db::{ConnectionProvider, CredentialSet, checked_ident, quote_ident, run_statement};
use bamz_log::{debug, error, info};
use std::sync::Arc;

const DUPLICATE_DATABASE: &str = "42P04";
const DUPLICATE_OBJECT: &str = "42710";

/// Administrative database `CREATE DATABASE` is issued from.
pub const MAINTENANCE_DB: &str = "postgres";

const ELEVATED_ROLE_OPTIONS: &str = "NOSUPERUSER CREATEDB CREATEROLE REPLICATION";
const PLAIN_ROLE_OPTIONS: &str = "NOSUPERUSER NOCREATEDB NOCREATEROLE NOREPLICATION";

const ROLE_EXISTS: &str =
    "SELECT rolname::text AS rolname FROM pg_catalog.pg_roles WHERE rolname = $1";

/// Creates databases and roles and applies the privilege protocol.
#[derive(Clone)]
pub struct ProvisioningEngine {
    connections: Arc<dyn ConnectionProvider>,
    superuser: CredentialSet,
    schemas: SchemaCatalog,
}

impl ProvisioningEngine {
    /// `superuser` points at the platform database; tenant credentials are
    /// derived from it by swapping the database name.
    pub fn new(
        connections: Arc<dyn ConnectionProvider>,
        superuser: CredentialSet,
        schemas: SchemaCatalog,
    ) -> Self {
        Self {
            connections,
            superuser,
            schemas,
        }
    }

    pub fn connections(&self) -> &Arc<dyn ConnectionProvider> {
        &self.connections
    }

    /// Superuser credentials against the platform database.
    pub fn platform_credentials(&self) -> &CredentialSet {
        &self.superuser
    }

    /// Superuser credentials against the database of `code`.
    pub fn tenant_credentials(&self, code: &str) -> CredentialSet {
        self.superuser.with_database(code)
    }

    /// Role that owns objects created by provisioning scripts.
    pub fn bootstrap_role(&self) -> &str {
        self.superuser.user()
    }

    /// Create the database named by `credentials` unless a trial connection
    /// succeeds. Returns whether it was created.
    ///
    /// A refused connection is fatal and propagates untouched.
    pub async fn ensure_database_exists(&self, credentials: &CredentialSet) -> TenantResult<bool> {
        let err = match self.connections.probe(credentials).await {
            Ok(()) => return Ok(false),
            Err(e) => e,
        };
        if err.is_connection_refused() {
            error!(
                target: "bamz::provisioning",
                "Cannot reach database server at {}:{}",
                credentials.host(),
                credentials.port()
            );
            return Err(err.into());
        }

        let database = checked_ident(credentials.database())?;
        debug!(target: "bamz::provisioning", "Trial connection to {} failed: {}", database, err);
        info!(target: "bamz::provisioning", "Creating database {}", database);

        let maintenance = credentials.with_database(MAINTENANCE_DB);
        let sql = format!("CREATE DATABASE {}", database);
        match run_statement(self.connections.as_ref(), &maintenance, &sql, &[]).await {
            Ok(_) => Ok(true),
            Err(e) if e.code() == Some(DUPLICATE_DATABASE) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Run the script `schema_id` as one batch against `credentials`.
    pub async fn apply_base_schema(
        &self,
        credentials: &CredentialSet,
        schema_id: &str,
    ) -> TenantResult<()> {
        let sql = self.schemas.load(schema_id).await?;
        debug!(
            target: "bamz::provisioning",
            "Applying schema {} to {}",
            schema_id,
            credentials.database()
        );
        let mut connection = self.connections.acquire(credentials).await?;
        connection.batch_execute(&sql).await?;
        Ok(())
    }

    /// Create each role that `pg_roles` does not list yet.
    pub async fn create_roles_if_missing(&self, roles: &[&str]) -> TenantResult<()> {
        let mut connection = self.connections.acquire(&self.superuser).await?;
        for role in roles {
            let role = checked_ident(role)?;
            if connection.fetch_optional(ROLE_EXISTS, &[role]).await?.is_some() {
                continue;
            }

            let options = if role == PLATFORM_ADMIN_ROLE {
                ELEVATED_ROLE_OPTIONS
            } else {
                PLAIN_ROLE_OPTIONS
            };
            info!(target: "bamz::provisioning", "Creating role {}", role);
            match connection
                .execute(&format!("CREATE ROLE {} {}", role, options), &[])
                .await
            {
                Ok(_) => {}
                // Lost a race with another creator
                Err(e) if e.code() == Some(DUPLICATE_OBJECT) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Apply the full admin, user and readonly bundle on `schema` of the
    /// database of `code`.
    pub async fn grant_privileges(&self, schema: &str, code: &str) -> TenantResult<()> {
        self.grant_schema(code, schema, GrantLevel::Default).await
    }

    /// Apply the tiers of `level` on `schema` of the database of `code`.
    pub async fn grant_schema(&self, code: &str, schema: &str, level: GrantLevel) -> TenantResult<()> {
        let plan = self.plan(code)?.level(schema, level)?;
        let mut connection = self.connections.acquire(&self.tenant_credentials(code)).await?;
        plan.apply(connection.as_mut()).await?;
        Ok(())
    }

    /// Empty plan for the roles of `code`.
    pub fn plan(&self, code: &str) -> TenantResult<PrivilegePlan> {
        Ok(PrivilegePlan::new(
            TenantRoles::for_tenant(code)?,
            self.bootstrap_role(),
        )?)
    }

    /// Create the tenant roles and grant them the base schemas.
    pub async fn prepare_privileges(&self, code: &str) -> TenantResult<()> {
        let roles = TenantRoles::for_tenant(code)?;
        self.create_roles_if_missing(&roles.all()).await?;

        let mut plan = self.plan(code)?;
        plan.push(format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
            code, roles.admin
        ));
        let plan = plan
            .admin_tier("public")?
            .base_tier("public")?
            .admin_tier("openbamz")?
            .base_tier("openbamz")?
            .user_tier("public")?
            .readonly_tier("public")?;

        let mut connection = self.connections.acquire(&self.tenant_credentials(code)).await?;
        plan.apply(connection.as_mut()).await?;
        Ok(())
    }

    /// Make the login role of `account` a member of the tenant admin role.
    pub async fn bind_account_to_role(&self, account: &str, code: &str) -> TenantResult<()> {
        let roles = TenantRoles::for_tenant(code)?;
        self.create_roles_if_missing(&[roles.admin.as_str()]).await?;

        let sql = format!("GRANT {} TO {}", roles.admin, quote_ident(account)?);
        run_statement(self.connections.as_ref(), &self.superuser, &sql, &[]).await?;
        Ok(())
    }

    /// Database, base schema and privileges of a tenant. Plugins are
    /// prepared separately.
    pub async fn provision_tenant(&self, code: &str) -> TenantResult<()> {
        let credentials = self.tenant_credentials(checked_ident(code)?);
        self.ensure_database_exists(&credentials).await?;
        self.apply_base_schema(&credentials, TENANT_BASE_SCHEMA).await?;
        self.prepare_privileges(code).await
    }

    /// Platform database, its schema and the platform roles.
    pub async fn prepare_main_database(&self) -> TenantResult<()> {
        self.ensure_database_exists(&self.superuser).await?;
        self.apply_base_schema(&self.superuser, PLATFORM_SCHEMA).await?;
        self.prepare_main_roles().await
    }

    /// `normal_user`, `anonymous` and `admin` with their grants.
    pub async fn prepare_main_roles(&self) -> TenantResult<()> {
        let roles = TenantRoles::platform();
        self.create_roles_if_missing(&[&roles.user, &roles.readonly, &roles.admin])
            .await?;

        let database = checked_ident(self.superuser.database())?;
        let mut plan = PrivilegePlan::new(roles.clone(), self.bootstrap_role())?;
        plan.push(format!("GRANT ALL ON DATABASE {} TO {}", database, roles.user));
        plan.push(format!("GRANT ALL ON DATABASE {} TO {}", database, roles.admin));
        plan.push(format!(
            "GRANT SELECT, INSERT, UPDATE ON ALL TABLES IN SCHEMA public TO {}",
            roles.user
        ));
        let plan = plan.admin_tier("public")?.admin_tier("private")?;

        let mut connection = self.connections.acquire(&self.superuser).await?;
        plan.apply(connection.as_mut()).await?;
        Ok(())
    }

    /// Drop the tenant database and its roles. Safe to repeat.
    pub async fn drop_tenant(&self, code: &str) -> TenantResult<()> {
        let roles = TenantRoles::for_tenant(code)?;
        info!(target: "bamz::provisioning", "Dropping database {}", code);

        let mut connection = self.connections.acquire(&self.superuser).await?;
        connection
            .execute(&format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", code), &[])
            .await?;

        if connection
            .fetch_optional(ROLE_EXISTS, &[roles.admin.as_str()])
            .await?
            .is_some()
        {
            connection
                .execute(&format!("DROP OWNED BY {} CASCADE", roles.admin), &[])
                .await?;
        }
        for role in [&roles.readonly, &roles.user, &roles.admin] {
            connection
                .execute(&format!("DROP ROLE IF EXISTS {}", role), &[])
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProvisioningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningEngine")
            .field("superuser", &self.superuser)
            .field("schemas", &self.schemas)
            .finish()
    }
}
