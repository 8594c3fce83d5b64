//! The seams every SQL-issuing component talks through.

use crate::{CredentialSet, DbError, DbResult};
use async_trait::async_trait;

/// A result row with text-rendered columns.
///
/// Queries read through [`SqlExecutor::fetch_rows`] must cast non-text
/// columns (`::text`) so every value decodes as a string or `NULL`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlRow {
    columns: Vec<(String, Option<String>)>,
}

impl SqlRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by executors and test doubles.
    pub fn with(mut self, column: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.columns.push((column.into(), value.map(Into::into)));
        self
    }

    /// Value of `column`, `None` when absent or `NULL`.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Value of `column`, erroring when absent or `NULL`.
    pub fn require(&self, column: &str) -> DbResult<&str> {
        self.get(column)
            .ok_or_else(|| DbError::MissingColumn(column.to_string()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A borrowed connection bound to one credential set.
///
/// Dropping the executor returns the connection to its pool, so release
/// happens on every exit path including `?` early returns.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Run one statement with positional text parameters (`$1`, `$2`, ...).
    async fn execute(&mut self, sql: &str, params: &[&str]) -> DbResult<u64>;

    /// Run one query and collect its rows.
    async fn fetch_rows(&mut self, sql: &str, params: &[&str]) -> DbResult<Vec<SqlRow>>;

    /// Run a multi-statement script as a single batch, without parameters.
    async fn batch_execute(&mut self, sql: &str) -> DbResult<()>;

    /// Credentials this connection was opened with.
    fn credentials(&self) -> &CredentialSet;

    /// First row of a query, if any.
    async fn fetch_optional(&mut self, sql: &str, params: &[&str]) -> DbResult<Option<SqlRow>> {
        Ok(self.fetch_rows(sql, params).await?.into_iter().next())
    }
}

/// Hands out connections for credential sets.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Borrow a pooled connection, creating the pool on first use.
    async fn acquire(&self, credentials: &CredentialSet) -> DbResult<Box<dyn SqlExecutor>>;

    /// Open and close a throwaway connection to find out whether the
    /// database is reachable. Fails with [`DbError::ConnectionRefused`] when
    /// the cluster is down and [`DbError::DatabaseMissing`] when the database
    /// does not exist.
    async fn probe(&self, credentials: &CredentialSet) -> DbResult<()>;
}

/// Acquire, run a single statement, release.
pub async fn run_statement(
    provider: &dyn ConnectionProvider,
    credentials: &CredentialSet,
    sql: &str,
    params: &[&str],
) -> DbResult<u64> {
    let mut connection = provider.acquire(credentials).await?;
    connection.execute(sql, params).await
}

/// Acquire, run a single query, release.
pub async fn run_query(
    provider: &dyn ConnectionProvider,
    credentials: &CredentialSet,
    sql: &str,
    params: &[&str],
) -> DbResult<Vec<SqlRow>> {
    let mut connection = provider.acquire(credentials).await?;
    connection.fetch_rows(sql, params).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup() {
        let row = SqlRow::new()
            .with("code", Some("shop1"))
            .with("owner", None::<String>);

        assert_eq!(row.get("code"), Some("shop1"));
        assert_eq!(row.get("owner"), None);
        assert_eq!(row.len(), 2);
        assert!(matches!(row.require("owner"), Err(DbError::MissingColumn(_))));
        assert!(row.require("code").is_ok());
    }
}
