//! Tenant lifecycle for bamz.
//!
//! A tenant is an application with its own Postgres database, three roles
//! (`<code>_admin`, `<code>_user`, `<code>_readonly`), a directory on disk and
//! a background worker. This crate owns the first three:
//!
//! - [`ProvisioningEngine`] creates databases and roles and applies the
//!   privilege protocol ([`PrivilegePlan`]).
//! - [`SchemaCatalog`] resolves schema scripts.
//! - [`TenantDirectory`] reads apps, owners and hostnames from the platform
//!   database; [`HostnameCache`] keeps the hostname routing in memory.
//! - [`TenantFiles`] lays out tenant directories.
//! - [`InvalidationHub`] tells interested caches that a tenant changed.
//!
//! ```rust,no_run
//! use bamz_db::{CredentialSet, PoolRegistry};
//! use bamz_tenancy::{ProvisioningEngine, SchemaCatalog};
//! use std::sync::Arc;
//!
//! # async fn demo() -> bamz_tenancy::TenantResult<()> {
//! let superuser = CredentialSet::new("postgres", "", "localhost", 5432, "bamz");
//! let engine = ProvisioningEngine::new(
//!     Arc::new(PoolRegistry::default()),
//!     superuser,
//!     SchemaCatalog::builtin(),
//! );
//!
//! engine.prepare_main_database().await?;
//! engine.provision_tenant("shop1").await?;
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod error;
pub mod files;
pub mod hostname;
pub mod invalidate;
pub mod privileges;
pub mod provisioning;
pub mod schema;
pub mod tenant;

pub use directory::TenantDirectory;
pub use error::{TenantError, TenantResult};
pub use files::TenantFiles;
pub use hostname::HostnameCache;
pub use invalidate::{InvalidationHub, TenantCacheInvalidator};
pub use privileges::{GrantLevel, PrivilegePlan};
pub use provisioning::{MAINTENANCE_DB, ProvisioningEngine};
pub use schema::{PLATFORM_SCHEMA, SchemaCatalog, TENANT_BASE_SCHEMA};
pub use tenant::{
    ANONYMOUS_ROLE, MAX_CODE_LEN, PLATFORM_ADMIN_ROLE, Tenant, TenantRoles, validate_code,
};
