//! Connection Pool Registry backed by sqlx.

use crate::{ConnectionProvider, CredentialSet, DbError, DbResult, SqlExecutor, SqlRow};
use async_trait::async_trait;
use bamz_log::{debug, error};
use parking_lot::RwLock;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Connection, PgConnection, Postgres, Row};
use std::collections::HashMap;
use std::time::Duration;

/// Pool sizing shared by every pool the registry creates.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&bamz_config::PlatformConfig> for PoolOptions {
    fn from(config: &bamz_config::PlatformConfig) -> Self {
        Self {
            max_connections: config.pool_max_connections,
            acquire_timeout: config.pool_acquire_timeout,
        }
    }
}

/// One lazily created pool per distinct credential set.
///
/// Pools are kept for the lifetime of the registry.
pub struct PoolRegistry {
    pools: RwLock<HashMap<String, PgPool>>,
    options: PoolOptions,
}

impl PoolRegistry {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Pool for `credentials`, created on first use.
    pub fn pool(&self, credentials: &CredentialSet) -> PgPool {
        let key = credentials.pool_key();
        if let Some(pool) = self.pools.read().get(&key) {
            return pool.clone();
        }

        let mut pools = self.pools.write();
        pools
            .entry(key)
            .or_insert_with(|| {
                debug!(target: "bamz::pool", "Creating pool for {}", credentials);
                PgPoolOptions::new()
                    .max_connections(self.options.max_connections)
                    .acquire_timeout(self.options.acquire_timeout)
                    .connect_lazy_with(credentials.connect_options())
            })
            .clone()
    }

    /// Number of pools created so far.
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new(PoolOptions::default())
    }
}

#[async_trait]
impl ConnectionProvider for PoolRegistry {
    async fn acquire(&self, credentials: &CredentialSet) -> DbResult<Box<dyn SqlExecutor>> {
        let connection = self
            .pool(credentials)
            .acquire()
            .await
            .map_err(|e| DbError::from_sqlx(e, credentials))?;

        Ok(Box::new(PgSession {
            connection,
            credentials: credentials.clone(),
        }))
    }

    async fn probe(&self, credentials: &CredentialSet) -> DbResult<()> {
        let connection = PgConnection::connect_with(&credentials.connect_options())
            .await
            .map_err(|e| DbError::from_sqlx(e, credentials))?;

        connection
            .close()
            .await
            .map_err(|e| DbError::from_sqlx(e, credentials))
    }
}

/// A pooled connection; returned to its pool on drop.
struct PgSession {
    connection: PoolConnection<Postgres>,
    credentials: CredentialSet,
}

impl PgSession {
    fn failed(&self, sql: &str, params: &[&str], err: sqlx::Error) -> DbError {
        let err = DbError::from_sqlx(err, &self.credentials);
        error!(
            target: "bamz::pool",
            kv: [
                ("database", self.credentials.database()),
                ("query", sql),
                ("params", format!("{:?}", params)),
                ("error", &err),
            ],
            "Error while running query"
        );
        err
    }
}

fn text_row(row: &PgRow) -> Result<SqlRow, sqlx::Error> {
    let mut out = SqlRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value: Option<String> = row.try_get(index)?;
        out = out.with(column.name(), value);
    }
    Ok(out)
}

#[async_trait]
impl SqlExecutor for PgSession {
    async fn execute(&mut self, sql: &str, params: &[&str]) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }

        match query.execute(&mut *self.connection).await {
            Ok(result) => Ok(result.rows_affected()),
            Err(e) => Err(self.failed(sql, params, e)),
        }
    }

    async fn fetch_rows(&mut self, sql: &str, params: &[&str]) -> DbResult<Vec<SqlRow>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }

        let rows = match query.fetch_all(&mut *self.connection).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.failed(sql, params, e)),
        };

        rows.iter()
            .map(text_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.failed(sql, params, e))
    }

    async fn batch_execute(&mut self, sql: &str) -> DbResult<()> {
        // Executor::execute hands back a boxed Send future tied to this borrow
        let connection: &mut PgConnection = &mut self.connection;
        let result = sqlx::Executor::execute(connection, sqlx::raw_sql(sql)).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.failed(sql, &[], e)),
        }
    }

    fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a local Postgres accepting `postgres` without a password:
    // cargo test -p bamz-db -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_batch_runs_every_statement() {
        let registry = PoolRegistry::default();
        let creds = CredentialSet::new("postgres", "", "127.0.0.1", 5432, "postgres");

        let mut conn = registry.acquire(&creds).await.unwrap();
        conn.batch_execute(
            "CREATE SCHEMA IF NOT EXISTS bamz_batch_check; \
             CREATE TABLE IF NOT EXISTS bamz_batch_check.t (id int); \
             INSERT INTO bamz_batch_check.t VALUES (1);",
        )
        .await
        .unwrap();

        let rows = conn
            .fetch_rows("SELECT count(*)::text AS n FROM bamz_batch_check.t", &[])
            .await
            .unwrap();
        assert_ne!(rows[0].get("n"), Some("0"));

        conn.batch_execute("DROP SCHEMA bamz_batch_check CASCADE;")
            .await
            .unwrap();
        assert!(conn.batch_execute("SELEC 1;").await.is_err());
    }

    #[tokio::test]
    async fn test_pools_are_keyed_by_credentials() {
        let registry = PoolRegistry::default();
        let shop1 = CredentialSet::new("postgres", "", "127.0.0.1", 5432, "shop1");
        let shop2 = shop1.with_database("shop2");

        assert!(registry.is_empty());
        registry.pool(&shop1);
        registry.pool(&shop1.clone());
        assert_eq!(registry.len(), 1);

        registry.pool(&shop2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_pool() {
        let registry = std::sync::Arc::new(PoolRegistry::default());
        let creds = CredentialSet::new("postgres", "", "127.0.0.1", 5432, "shop1");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let creds = creds.clone();
            handles.push(tokio::spawn(async move {
                registry.pool(&creds);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 1);
    }
}
