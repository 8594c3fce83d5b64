//! Tenant model and role naming.

use crate::{TenantError, TenantResult};
use bamz_db::is_bare_ident;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Longest tenant code that still leaves room for the `_readonly` suffix
/// inside Postgres' 63-byte identifier limit.
pub const MAX_CODE_LEN: usize = 54;

/// An application: one database, three roles, one directory, one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    /// Unique, stable identifier; also the database name
    pub code: String,

    /// Login role of the owning account
    pub owner: Option<String>,

    /// Custom hostnames routed to this tenant
    pub hostnames: Vec<String>,

    /// Installed plugin ids
    pub plugins: BTreeSet<String>,
}

impl Tenant {
    /// Create a tenant, validating its code.
    ///
    /// ```
    /// use bamz_tenancy::Tenant;
    ///
    /// let tenant = Tenant::new("shop1").unwrap().with_owner("4f1c0d9e");
    /// assert_eq!(tenant.roles().user, "shop1_user");
    /// assert!(Tenant::new("Shop-1").is_err());
    /// ```
    pub fn new(code: impl Into<String>) -> TenantResult<Self> {
        let code = code.into();
        validate_code(&code)?;
        Ok(Self {
            code,
            owner: None,
            hostnames: Vec::new(),
            plugins: BTreeSet::new(),
        })
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostnames.push(hostname.into());
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugins.insert(plugin.into());
        self
    }

    /// The tenant's three database roles.
    pub fn roles(&self) -> TenantRoles {
        TenantRoles::named(&self.code)
    }
}

/// Check a tenant code before it is spliced into DDL or a path.
pub fn validate_code(code: &str) -> TenantResult<()> {
    if is_bare_ident(code) && code.len() <= MAX_CODE_LEN {
        Ok(())
    } else {
        Err(TenantError::Invalid(code.to_string()))
    }
}

/// Role triple of a tenant (or of the platform itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRoles {
    pub admin: String,
    pub user: String,
    pub readonly: String,
}

impl TenantRoles {
    /// `<code>_admin`, `<code>_user`, `<code>_readonly`.
    pub fn for_tenant(code: &str) -> TenantResult<Self> {
        validate_code(code)?;
        Ok(Self::named(code))
    }

    fn named(code: &str) -> Self {
        Self {
            admin: format!("{}_admin", code),
            user: format!("{}_user", code),
            readonly: format!("{}_readonly", code),
        }
    }

    /// Roles of the platform database: `admin`, `normal_user`, `anonymous`.
    pub fn platform() -> Self {
        Self {
            admin: PLATFORM_ADMIN_ROLE.to_string(),
            user: "normal_user".to_string(),
            readonly: ANONYMOUS_ROLE.to_string(),
        }
    }

    /// Admin first: later grants name it.
    pub fn all(&self) -> [&str; 3] {
        [&self.admin, &self.user, &self.readonly]
    }
}

/// The top-level admin role; the only role created with elevated options.
pub const PLATFORM_ADMIN_ROLE: &str = "admin";

/// Role of requests without any identity.
pub const ANONYMOUS_ROLE: &str = "anonymous";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_builder() {
        let tenant = Tenant::new("shop1")
            .unwrap()
            .with_owner("acc-1")
            .with_hostname("shop.example.com")
            .with_plugin("billing");

        assert_eq!(tenant.owner.as_deref(), Some("acc-1"));
        assert_eq!(tenant.hostnames, vec!["shop.example.com".to_string()]);
        assert!(tenant.plugins.contains("billing"));
    }

    #[test]
    fn test_role_names() {
        let roles = TenantRoles::for_tenant("shop1").unwrap();
        assert_eq!(roles.all(), ["shop1_admin", "shop1_user", "shop1_readonly"]);

        let platform = TenantRoles::platform();
        assert_eq!(platform.admin, "admin");
        assert_eq!(platform.readonly, "anonymous");
    }

    #[test]
    fn test_code_validation() {
        assert!(validate_code("shop1").is_ok());
        assert!(validate_code(&"a".repeat(MAX_CODE_LEN)).is_ok());
        assert!(validate_code(&"a".repeat(MAX_CODE_LEN + 1)).is_err());
        assert!(validate_code("shop1; DROP DATABASE bamz").is_err());
        assert!(matches!(
            TenantRoles::for_tenant("../etc"),
            Err(TenantError::Invalid(_))
        ));
    }
}
