//! The seam between the registry and the GraphQL execution engine.

use crate::claims::{PgSettings, RequestIdentity, resolve_tenant_settings};
use crate::{GraphQLConfig, GraphQLResult};
use async_graphql::{ObjectType, Schema, SubscriptionType};
use async_trait::async_trait;
use bamz_db::CredentialSet;
use bamz_log::debug;
use bamz_tenancy::TenantRoles;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A running GraphQL engine for one tenant.
#[async_trait]
pub trait SchemaService: Send + Sync {
    async fn execute(&self, request: async_graphql::Request) -> async_graphql::Response;

    /// Free the engine's resources. Called once, before the handle is
    /// dropped from the cache.
    async fn release(&self);
}

/// Everything needed to build a tenant's service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub code: String,
    /// Superuser credentials against the tenant database
    pub credentials: CredentialSet,
    /// Schemas the service exposes, in order
    pub schemas: Vec<String>,
    pub config: GraphQLConfig,
}

/// Builds services; called once per cache miss.
#[async_trait]
pub trait SchemaServiceFactory: Send + Sync {
    async fn build(&self, spec: ServiceSpec) -> GraphQLResult<Arc<dyn SchemaService>>;
}

/// Adapts an `async_graphql::Schema` to [`SchemaService`].
pub struct AsyncGraphQLService<Query, Mutation, Subscription> {
    schema: Schema<Query, Mutation, Subscription>,
    released: AtomicBool,
}

impl<Query, Mutation, Subscription> AsyncGraphQLService<Query, Mutation, Subscription>
where
    Query: ObjectType + 'static,
    Mutation: ObjectType + 'static,
    Subscription: SubscriptionType + 'static,
{
    pub fn new(schema: Schema<Query, Mutation, Subscription>) -> Self {
        Self {
            schema,
            released: AtomicBool::new(false),
        }
    }

    pub fn schema(&self) -> &Schema<Query, Mutation, Subscription> {
        &self.schema
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<Query, Mutation, Subscription> SchemaService
    for AsyncGraphQLService<Query, Mutation, Subscription>
where
    Query: ObjectType + 'static,
    Mutation: ObjectType + 'static,
    Subscription: SubscriptionType + 'static,
{
    async fn execute(&self, request: async_graphql::Request) -> async_graphql::Response {
        self.schema.execute(request).await
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

type BuildFn = dyn Fn(&ServiceSpec) -> GraphQLResult<Arc<dyn SchemaService>> + Send + Sync;

/// Factory backed by a closure.
///
/// ```
/// use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
/// use bamz_graphql::{AsyncGraphQLFactory, AsyncGraphQLService};
/// use std::sync::Arc;
///
/// struct Query;
///
/// #[Object]
/// impl Query {
///     async fn ok(&self) -> bool {
///         true
///     }
/// }
///
/// let factory = AsyncGraphQLFactory::new(|_spec| {
///     let schema = Schema::new(Query, EmptyMutation, EmptySubscription);
///     Ok(Arc::new(AsyncGraphQLService::new(schema)))
/// });
/// ```
pub struct AsyncGraphQLFactory {
    build: Box<BuildFn>,
}

impl AsyncGraphQLFactory {
    pub fn new<F, S>(build: F) -> Self
    where
        F: Fn(&ServiceSpec) -> GraphQLResult<Arc<S>> + Send + Sync + 'static,
        S: SchemaService + 'static,
    {
        Self {
            build: Box::new(move |spec| {
                let service: Arc<dyn SchemaService> = build(spec)?;
                Ok(service)
            }),
        }
    }
}

#[async_trait]
impl SchemaServiceFactory for AsyncGraphQLFactory {
    async fn build(&self, spec: ServiceSpec) -> GraphQLResult<Arc<dyn SchemaService>> {
        debug!(
            target: "bamz::graphql",
            "Building schema service for {} with schemas {:?}",
            spec.code,
            spec.schemas
        );
        (self.build)(&spec)
    }
}

/// A cached, ready-to-use tenant service.
pub struct ServiceHandle {
    spec: ServiceSpec,
    service: Arc<dyn SchemaService>,
}

impl ServiceHandle {
    pub fn new(spec: ServiceSpec, service: Arc<dyn SchemaService>) -> Self {
        Self { spec, service }
    }

    pub fn code(&self) -> &str {
        &self.spec.code
    }

    pub fn schemas(&self) -> &[String] {
        &self.spec.schemas
    }

    pub fn config(&self) -> &GraphQLConfig {
        &self.spec.config
    }

    pub fn credentials(&self) -> &CredentialSet {
        &self.spec.credentials
    }

    /// Settings a request from `identity` runs with.
    pub fn settings_for(&self, identity: &RequestIdentity) -> PgSettings {
        resolve_tenant_settings(identity, &self.spec.code, None)
    }

    /// Run `request` as the role resolved from `identity`. Resolvers read
    /// the role from the [`PgSettings`] request data.
    pub async fn execute(
        &self,
        request: async_graphql::Request,
        identity: &RequestIdentity,
    ) -> async_graphql::Response {
        let settings = self.settings_for(identity);
        self.service.execute(request.data(settings)).await
    }

    /// Run `request` as the tenant admin role.
    pub async fn execute_as_admin(&self, request: async_graphql::Request) -> async_graphql::Response {
        let admin = TenantRoles::for_tenant(&self.spec.code)
            .map(|roles| roles.admin)
            .unwrap_or_else(|_| format!("{}_admin", self.spec.code));
        let settings = resolve_tenant_settings(&RequestIdentity::new(), &self.spec.code, Some(&admin));
        self.service.execute(request.data(settings)).await
    }

    pub(crate) async fn release(&self) {
        self.service.release().await;
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("code", &self.spec.code)
            .field("schemas", &self.spec.schemas)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::{Context, EmptyMutation, EmptySubscription, Object};

    struct Query;

    #[Object]
    impl Query {
        async fn role(&self, ctx: &Context<'_>) -> String {
            ctx.data::<PgSettings>()
                .map(|settings| settings.role().to_string())
                .unwrap_or_default()
        }
    }

    fn handle() -> (ServiceHandle, Arc<AsyncGraphQLService<Query, EmptyMutation, EmptySubscription>>) {
        let service = Arc::new(AsyncGraphQLService::new(Schema::new(
            Query,
            EmptyMutation,
            EmptySubscription,
        )));
        let spec = ServiceSpec {
            code: "shop1".to_string(),
            credentials: CredentialSet::new("postgres", "", "localhost", 5432, "shop1"),
            schemas: vec!["public".to_string(), "openbamz".to_string()],
            config: GraphQLConfig::for_tenant("shop1"),
        };
        (ServiceHandle::new(spec, service.clone()), service)
    }

    #[tokio::test]
    async fn test_requests_carry_the_resolved_role() {
        let (handle, _) = handle();

        let identity = RequestIdentity::new().with_role("shop1", "shop1_user");
        let response = handle.execute("{ role }".into(), &identity).await;
        assert_eq!(
            response.data.into_json().unwrap(),
            serde_json::json!({"role": "shop1_user"})
        );

        let response = handle.execute("{ role }".into(), &RequestIdentity::new()).await;
        assert_eq!(
            response.data.into_json().unwrap(),
            serde_json::json!({"role": "anonymous"})
        );

        let response = handle.execute_as_admin("{ role }".into()).await;
        assert_eq!(
            response.data.into_json().unwrap(),
            serde_json::json!({"role": "shop1_admin"})
        );
    }

    #[tokio::test]
    async fn test_release() {
        let (handle, service) = handle();
        assert!(!service.is_released());
        handle.release().await;
        assert!(service.is_released());
    }

    #[tokio::test]
    async fn test_closure_factory() {
        let factory = AsyncGraphQLFactory::new(|spec| {
            assert_eq!(spec.schemas, vec!["public".to_string()]);
            Ok(Arc::new(AsyncGraphQLService::new(Schema::new(
                Query,
                EmptyMutation,
                EmptySubscription,
            ))))
        });

        let spec = ServiceSpec {
            code: "shop1".to_string(),
            credentials: CredentialSet::new("postgres", "", "localhost", 5432, "shop1"),
            schemas: vec!["public".to_string()],
            config: GraphQLConfig::for_tenant("shop1"),
        };
        let service = factory.build(spec).await.unwrap();
        let response = service.execute("{ role }".into()).await;
        assert!(response.errors.is_empty());
    }
}
