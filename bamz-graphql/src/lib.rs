//! GraphQL schema services for bamz tenants.
//!
//! The [`SchemaServiceRegistry`] hands out one [`ServiceHandle`] per tenant.
//! On a cache miss it provisions the tenant (database, roles, privileges,
//! plugins) and builds the service through a [`SchemaServiceFactory`]. The
//! engine behind the factory is opaque; [`AsyncGraphQLService`] adapts any
//! `async_graphql::Schema`.
//!
//! Requests run with [`PgSettings`] resolved from the caller's verified
//! claims ([`RequestIdentity`]).

pub mod claims;
pub mod config;
pub mod error;
pub mod guard;
pub mod registry;
pub mod service;

pub use async_graphql;

pub use claims::{
    MAX_CLAIM_KEY_LEN, PLATFORM_DOMAIN, PgSettings, RequestIdentity, is_valid_claim_key,
    resolve_platform_settings, resolve_tenant_settings,
};
pub use config::GraphQLConfig;
pub use error::{GraphQLError, GraphQLResult};
pub use guard::AccessGuard;
pub use registry::{PLUGIN_ID_PREFIX, RegistryOptions, SchemaServiceRegistry, plugin_schemas};
pub use service::{
    AsyncGraphQLFactory, AsyncGraphQLService, SchemaService, SchemaServiceFactory, ServiceHandle,
    ServiceSpec,
};
