//! Credential sets: the identity of a connection pool.

use bamz_config::DatabaseSettings;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

/// The five fields that identify a Postgres login against one database.
///
/// Two credential sets are the same pool exactly when all five fields are
/// equal. Values are immutable; use the `with_*` methods to derive variants.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialSet {
    user: String,
    password: String,
    host: String,
    port: u16,
    database: String,
}

impl CredentialSet {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            host: host.into(),
            port,
            database: database.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Same login, different database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }

    /// Same server and database, different login.
    pub fn with_login(&self, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            ..self.clone()
        }
    }

    /// Structural key used by the pool registry.
    pub fn pool_key(&self) -> String {
        serde_json::json!([self.user, self.password, self.host, self.port, self.database])
            .to_string()
    }

    /// sqlx connect options for these credentials.
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database)
            .application_name("bamz");

        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }
}

impl From<&DatabaseSettings> for CredentialSet {
    fn from(settings: &DatabaseSettings) -> Self {
        Self::new(
            &settings.user,
            &settings.password,
            &settings.host,
            settings.port,
            &settings.name,
        )
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

impl std::fmt::Display for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_identity() {
        let a = CredentialSet::new("postgres", "pw", "localhost", 5432, "shop1");
        let b = CredentialSet::new("postgres", "pw", "localhost", 5432, "shop1");
        assert_eq!(a, b);
        assert_eq!(a.pool_key(), b.pool_key());

        let other_db = a.with_database("shop2");
        assert_ne!(a, other_db);
        assert_ne!(a.pool_key(), other_db.pool_key());
        assert_eq!(other_db.user(), "postgres");
    }

    #[test]
    fn test_pool_key_does_not_collide_on_separators() {
        let a = CredentialSet::new("a", "b:c", "h", 1, "d");
        let b = CredentialSet::new("a:b", "c", "h", 1, "d");
        assert_ne!(a.pool_key(), b.pool_key());
    }

    #[test]
    fn test_from_settings() {
        let settings = DatabaseSettings::default();
        let creds = CredentialSet::from(&settings);
        assert_eq!(creds.database(), "bamz");
        assert_eq!(creds.port(), 5432);
    }

    #[test]
    fn test_debug_and_display_hide_password() {
        let creds = CredentialSet::new("postgres", "hunter2", "localhost", 5432, "bamz");
        assert!(!format!("{:?}", creds).contains("hunter2"));
        assert_eq!(creds.to_string(), "postgres@localhost:5432/bamz");
    }
}
