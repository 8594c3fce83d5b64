//! Privilege plans.
//!
//! A plan is an ordered list of `GRANT` and `ALTER DEFAULT PRIVILEGES`
//! statements for one role triple. Tiers must be added admin first: every
//! default-privilege rule names the tenant admin as an owner, so the admin
//! grants have to exist before the user and readonly rules are issued.
//!
//! Default-privilege rules are registered under every role that may create
//! objects later (the bootstrap superuser and the tenant admin). Identical
//! statements are emitted once.

use crate::TenantRoles;
use bamz_db::{DbResult, SqlExecutor, is_bare_ident, quote_ident};
use serde::{Deserialize, Serialize};

/// Access level a schema is granted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantLevel {
    /// Admin, user and readonly tiers together
    #[default]
    Default,
    Admin,
    User,
    Readonly,
}

impl GrantLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "default" => Some(GrantLevel::Default),
            "admin" => Some(GrantLevel::Admin),
            "user" => Some(GrantLevel::User),
            "readonly" => Some(GrantLevel::Readonly),
            _ => None,
        }
    }
}

/// Ordered, deduplicated grant statements for one role triple.
#[derive(Debug, Clone)]
pub struct PrivilegePlan {
    roles: TenantRoles,
    owners: Vec<String>,
    statements: Vec<String>,
}

impl PrivilegePlan {
    /// Plan for `roles`, with default privileges registered for objects
    /// created later by `bootstrap` or by the admin role.
    ///
    /// `bootstrap` is the configured login and is quoted when it is not a
    /// bare identifier.
    pub fn new(roles: TenantRoles, bootstrap: &str) -> DbResult<Self> {
        let mut owners = vec![sql_ident(bootstrap)?];
        if roles.admin != bootstrap {
            owners.push(roles.admin.clone());
        }
        Ok(Self {
            roles,
            owners,
            statements: Vec::new(),
        })
    }

    pub fn roles(&self) -> &TenantRoles {
        &self.roles
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Append a raw statement unless it is already planned.
    pub fn push(&mut self, sql: impl Into<String>) {
        let sql = sql.into();
        if !self.statements.contains(&sql) {
            self.statements.push(sql);
        }
    }

    /// Full DDL/DML and default-privilege authority for the admin role.
    pub fn admin_tier(mut self, schema: &str) -> DbResult<Self> {
        let schema = sql_ident(schema)?;
        let admin = self.roles.admin.clone();

        self.push(format!("GRANT ALL PRIVILEGES ON SCHEMA {} TO {}", schema, admin));
        for objects in ["TABLES", "SEQUENCES", "FUNCTIONS"] {
            self.push(format!(
                "GRANT ALL PRIVILEGES ON ALL {} IN SCHEMA {} TO {}",
                objects, schema, admin
            ));
        }
        for objects in ["TABLES", "SEQUENCES", "FUNCTIONS"] {
            self.default_rule(&schema, "ALL PRIVILEGES", objects, &admin);
        }
        Ok(self)
    }

    /// Schema usage and function execution for the user and readonly roles.
    pub fn base_tier(mut self, schema: &str) -> DbResult<Self> {
        let schema = sql_ident(schema)?;
        for grantee in [self.roles.user.clone(), self.roles.readonly.clone()] {
            self.push(format!("GRANT USAGE ON SCHEMA {} TO {}", schema, grantee));
            self.push(format!(
                "GRANT EXECUTE ON ALL FUNCTIONS IN SCHEMA {} TO {}",
                schema, grantee
            ));
            self.default_rule(&schema, "EXECUTE", "FUNCTIONS", &grantee);
        }
        Ok(self)
    }

    /// Read/write access for the user role.
    pub fn user_tier(mut self, schema: &str) -> DbResult<Self> {
        let schema = sql_ident(schema)?;
        let user = self.roles.user.clone();

        self.push(format!(
            "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {} TO {}",
            schema, user
        ));
        self.push(format!(
            "GRANT USAGE, SELECT, UPDATE ON ALL SEQUENCES IN SCHEMA {} TO {}",
            schema, user
        ));
        self.push(format!(
            "GRANT EXECUTE ON ALL FUNCTIONS IN SCHEMA {} TO {}",
            schema, user
        ));
        self.default_rule(&schema, "SELECT, INSERT, UPDATE, DELETE", "TABLES", &user);
        self.default_rule(&schema, "USAGE, SELECT, UPDATE", "SEQUENCES", &user);
        self.default_rule(&schema, "EXECUTE", "FUNCTIONS", &user);
        Ok(self)
    }

    /// Select-only access for the readonly role.
    pub fn readonly_tier(mut self, schema: &str) -> DbResult<Self> {
        let schema = sql_ident(schema)?;
        let readonly = self.roles.readonly.clone();

        self.push(format!(
            "GRANT SELECT ON ALL TABLES IN SCHEMA {} TO {}",
            schema, readonly
        ));
        self.default_rule(&schema, "SELECT", "TABLES", &readonly);
        Ok(self)
    }

    /// Add the tiers `level` stands for on `schema`.
    pub fn level(self, schema: &str, level: GrantLevel) -> DbResult<Self> {
        match level {
            GrantLevel::Default => self
                .admin_tier(schema)?
                .base_tier(schema)?
                .user_tier(schema)?
                .readonly_tier(schema),
            GrantLevel::Admin => self.admin_tier(schema),
            GrantLevel::User => self.base_tier(schema)?.user_tier(schema),
            GrantLevel::Readonly => self.base_tier(schema)?.readonly_tier(schema),
        }
    }

    /// Run every planned statement in order on `connection`.
    pub async fn apply(&self, connection: &mut dyn SqlExecutor) -> DbResult<()> {
        for sql in &self.statements {
            connection.execute(sql, &[]).await?;
        }
        Ok(())
    }

    fn default_rule(&mut self, schema: &str, privileges: &str, objects: &str, grantee: &str) {
        for owner in self.owners.clone() {
            self.push(format!(
                "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {} GRANT {} ON {} TO {}",
                owner, schema, privileges, objects, grantee
            ));
        }
    }
}

fn sql_ident(name: &str) -> DbResult<String> {
    if is_bare_ident(name) {
        Ok(name.to_string())
    } else {
        quote_ident(name)
    }
}
