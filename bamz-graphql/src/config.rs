/// Endpoints of one tenant's GraphQL service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphQLConfig {
    /// GraphQL endpoint path
    pub endpoint: String,

    /// Enable GraphiQL
    pub enable_graphiql: bool,

    /// GraphiQL endpoint path (if enabled)
    pub graphiql_endpoint: String,

    /// Subscription stream endpoint path
    pub stream_endpoint: String,
}

impl GraphQLConfig {
    /// Endpoints under `/graphql/<code>`, with GraphiQL enabled.
    ///
    /// # Example
    ///
    /// ```
    /// use bamz_graphql::GraphQLConfig;
    ///
    /// let config = GraphQLConfig::for_tenant("shop1");
    /// assert_eq!(config.endpoint, "/graphql/shop1");
    /// assert_eq!(config.graphiql_endpoint, "/graphiql/shop1");
    /// assert_eq!(config.stream_endpoint, "/graphql/shop1/stream");
    /// ```
    pub fn for_tenant(code: &str) -> Self {
        Self {
            endpoint: format!("/graphql/{}", code),
            enable_graphiql: true,
            graphiql_endpoint: format!("/graphiql/{}", code),
            stream_endpoint: format!("/graphql/{}/stream", code),
        }
    }

    /// Single-database deployments serve no per-tenant GraphiQL.
    ///
    /// ```
    /// use bamz_graphql::GraphQLConfig;
    ///
    /// let config = GraphQLConfig::mono("shop1");
    /// assert!(!config.enable_graphiql);
    /// assert!(!config.matches("/graphiql/shop1"));
    /// ```
    pub fn mono(code: &str) -> Self {
        Self::for_tenant(code).with_graphiql(false)
    }

    /// Enable or disable GraphiQL
    pub fn with_graphiql(mut self, enable: bool) -> Self {
        self.enable_graphiql = enable;
        self
    }

    /// Whether a request for `path` belongs to this service.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let path = path.strip_suffix('/').unwrap_or(path);
        path == self.endpoint
            || path == self.stream_endpoint
            || (self.enable_graphiql && path == self.graphiql_endpoint)
    }
}
