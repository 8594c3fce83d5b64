//! Request guards for app and plugin endpoints.

use crate::claims::{PLATFORM_DOMAIN, RequestIdentity};
use crate::{GraphQLError, GraphQLResult};
use bamz_plugins::MembershipCache;
use bamz_tenancy::TenantDirectory;
use std::sync::Arc;

/// Checks a caller's platform identity against apps and plugins.
#[derive(Clone)]
pub struct AccessGuard {
    directory: TenantDirectory,
    membership: Arc<MembershipCache>,
}

impl AccessGuard {
    pub fn new(directory: TenantDirectory, membership: Arc<MembershipCache>) -> Self {
        Self {
            directory,
            membership,
        }
    }

    /// The caller's role, if it may use `app`.
    pub async fn check_app_access(&self, app: &str, identity: &RequestIdentity) -> GraphQLResult<String> {
        let role = platform_role(identity)?;
        if self.directory.role_can_see(app, role).await? {
            Ok(role.to_string())
        } else {
            Err(GraphQLError::Unauthorized("Unauthorized for app".to_string()))
        }
    }

    /// Fails unless the caller is identified and `plugin` is installed in
    /// `app`.
    pub async fn require_plugin(
        &self,
        app: &str,
        plugin: &str,
        identity: &RequestIdentity,
    ) -> GraphQLResult<()> {
        platform_role(identity)?;
        if self.membership.has_plugin(app, plugin).await {
            Ok(())
        } else {
            Err(GraphQLError::Forbidden(format!(
                "Plugin {} is not installed in {}",
                plugin, app
            )))
        }
    }
}

fn platform_role(identity: &RequestIdentity) -> GraphQLResult<&str> {
    identity
        .role(PLATFORM_DOMAIN)
        .ok_or_else(|| GraphQLError::Unauthorized("No token".to_string()))
}
