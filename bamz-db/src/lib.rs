//! Postgres access for bamz.
//!
//! Every component that issues SQL goes through a [`ConnectionProvider`].
//! The production provider is [`PoolRegistry`], which keeps one sqlx pool per
//! distinct [`CredentialSet`]. Tests swap in a simulated cluster.
//!
//! ```rust,no_run
//! use bamz_db::{ConnectionProvider, CredentialSet, PoolOptions, PoolRegistry};
//!
//! # async fn demo() -> bamz_db::DbResult<()> {
//! let pools = PoolRegistry::new(PoolOptions::default());
//! let creds = CredentialSet::new("postgres", "", "localhost", 5432, "shop1");
//!
//! let mut conn = pools.acquire(&creds).await?;
//! let rows = conn.fetch_rows("SELECT current_database() AS db", &[]).await?;
//! assert_eq!(rows[0].get("db"), Some("shop1"));
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod error;
pub mod executor;
pub mod ident;
pub mod pool;

pub use credentials::CredentialSet;
pub use error::{DbError, DbResult};
pub use executor::{ConnectionProvider, SqlExecutor, SqlRow, run_query, run_statement};
pub use ident::{checked_ident, is_bare_ident, quote_ident};
pub use pool::{PoolOptions, PoolRegistry};
