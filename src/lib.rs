//! # bamz
//!
//! A multi-tenant Postgres application platform. Each tenant ("app") gets
//! its own database, roles and data directory; a GraphQL schema service is
//! built per tenant on first use and rebuilt whenever plugins change.
//!
//! ## Crates
//!
//! - [`log`]: structured logging
//! - [`config`]: environment and file configuration
//! - [`db`]: connection pools and the SQL executor seam
//! - [`tenancy`]: provisioning, privileges, tenant files and hostnames
//! - [`plugins`]: plugin lifecycle and dependency ordering
//! - [`graphql`]: schema-service registry, claims and access guards
//! - [`queue`]: per-database job queues and built-in tasks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bamz::graphql::async_graphql::{self, EmptyMutation, EmptySubscription, Object, Schema};
//! use bamz::graphql::{AsyncGraphQLFactory, AsyncGraphQLService};
//! use bamz::plugins::PluginRegistry;
//! use bamz::{Platform, PlatformConfig};
//! use std::sync::Arc;
//!
//! struct Query;
//!
//! #[Object]
//! impl Query {
//!     async fn ok(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn demo() -> bamz::Result<()> {
//! let factory = AsyncGraphQLFactory::new(|_spec| {
//!     Ok(Arc::new(AsyncGraphQLService::new(Schema::new(Query, EmptyMutation, EmptySubscription))))
//! });
//!
//! let platform = Platform::new(PlatformConfig::from_env()?, PluginRegistry::new(), Arc::new(factory));
//! platform.prepare().await?;
//! platform.start_workers().await?;
//!
//! let service = platform.service("shop1").await?;
//! assert!(service.schemas().contains(&"openbamz".to_string()));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod platform;

pub use bamz_config as config;
pub use bamz_db as db;
pub use bamz_graphql as graphql;
pub use bamz_log as log;
pub use bamz_plugins as plugins;
pub use bamz_queue as queue;
pub use bamz_tenancy as tenancy;

pub use bamz_config::PlatformConfig;
pub use error::{BamzError, Result};
pub use platform::Platform;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{BamzError, Platform, PlatformConfig, Result};
    pub use bamz_db::{ConnectionProvider, CredentialSet, SqlExecutor};
    pub use bamz_graphql::{RequestIdentity, SchemaServiceFactory, ServiceHandle};
    pub use bamz_plugins::{Plugin, PluginRegistry, PluginTask};
    pub use bamz_queue::{JobQueue, NewJob, TaskHandler, TaskRegistry};
    pub use bamz_tenancy::{ProvisioningEngine, TenantDirectory};
}
