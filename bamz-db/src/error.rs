//! Database error types.

use crate::CredentialSet;
use thiserror::Error;

/// SQLSTATE `invalid_catalog_name`
const DATABASE_MISSING: &str = "3D000";

/// Errors raised while connecting to or querying Postgres.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// The cluster itself is unreachable. Never retried or papered over.
    #[error("Connection refused by {host}:{port}")]
    ConnectionRefused { host: String, port: u16 },

    #[error("Database does not exist: {0}")]
    DatabaseMissing(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {message}")]
    Query {
        code: Option<String>,
        message: String,
    },

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Column not found in row: {0}")]
    MissingColumn(String),
}

impl DbError {
    /// Build a query error from a SQLSTATE and message.
    pub fn query(code: Option<&str>, message: impl Into<String>) -> Self {
        DbError::Query {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Classify an sqlx error raised while talking to `credentials`.
    pub fn from_sqlx(err: sqlx::Error, credentials: &CredentialSet) -> Self {
        match err {
            sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                Self::refused(credentials)
            }
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                if code.as_deref() == Some(DATABASE_MISSING) {
                    DbError::DatabaseMissing(credentials.database().to_string())
                } else {
                    DbError::Query {
                        code,
                        message: db.message().to_string(),
                    }
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => DbError::Pool(err.to_string()),
            other => {
                let message = other.to_string();
                if message.contains("Connection refused") || message.contains("ECONNREFUSED") {
                    Self::refused(credentials)
                } else {
                    DbError::Connection(message)
                }
            }
        }
    }

    fn refused(credentials: &CredentialSet) -> Self {
        DbError::ConnectionRefused {
            host: credentials.host().to_string(),
            port: credentials.port(),
        }
    }

    /// Whether the failure means the cluster is unreachable.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, DbError::ConnectionRefused { .. })
    }

    /// SQLSTATE of a query error, if the server reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Query { code, .. } => code.as_deref(),
            DbError::DatabaseMissing(_) => Some(DATABASE_MISSING),
            _ => None,
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> CredentialSet {
        CredentialSet::new("postgres", "secret", "db.internal", 5432, "shop1")
    }

    #[test]
    fn test_io_refused_is_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = DbError::from_sqlx(sqlx::Error::Io(io), &creds());
        assert!(err.is_connection_refused());
        assert_eq!(
            err.to_string(),
            "Connection refused by db.internal:5432"
        );
    }

    #[test]
    fn test_pool_timeout_is_not_fatal() {
        let err = DbError::from_sqlx(sqlx::Error::PoolTimedOut, &creds());
        assert!(matches!(err, DbError::Pool(_)));
        assert!(!err.is_connection_refused());
    }

    #[test]
    fn test_codes() {
        assert_eq!(DbError::DatabaseMissing("x".into()).code(), Some("3D000"));
        assert_eq!(DbError::query(Some("42710"), "exists").code(), Some("42710"));
        assert_eq!(DbError::Pool("x".into()).code(), None);
    }
}
