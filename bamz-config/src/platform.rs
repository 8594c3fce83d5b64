//! Typed platform settings.
//!
//! | key | default |
//! |---|---|
//! | `DB_USER` / `DB_PASSWORD` | `postgres` / empty |
//! | `DB_HOST` / `DB_PORT` | `localhost` / `5432` |
//! | `DB_NAME` | `bamz` |
//! | `DATA_DIR` | `./data` |
//! | `SCHEMA_DIR` | built-in definitions |
//! | `MONO_DATABASE` | `false` |
//! | `BAMZ_POOL_MAX_CONNECTIONS` | `10` |
//! | `BAMZ_POOL_ACQUIRE_TIMEOUT_SECS` | `30` |
//! | `BAMZ_WORKER_CONCURRENCY` | `5` |
//! | `BAMZ_WORKER_POLL_MS` | `1000` |
//! | `BAMZ_INIT_POLL_MS` | `100` |
//! | `BAMZ_INIT_TIMEOUT_SECS` | `60` |

use crate::{ConfigManager, ConfigValidator, Result, Source, Validate};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings of the platform database and its bootstrap superuser.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .finish()
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            name: "bamz".to_string(),
        }
    }
}

/// Everything the orchestrator reads from its environment.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub database: DatabaseSettings,
    /// Root of tenant directories (`<data_dir>/apps/<code>`)
    pub data_dir: PathBuf,
    /// Directory holding `<schema id>.sql` files; built-ins when unset
    pub schema_dir: Option<PathBuf>,
    /// Single-database deployment: no per-tenant GraphiQL
    pub mono_database: bool,
    pub pool_max_connections: u32,
    pub pool_acquire_timeout: Duration,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    /// Sleep between checks while another caller provisions a tenant
    pub init_poll_interval: Duration,
    /// Give up waiting on someone else's provisioning after this long
    pub init_wait_timeout: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            data_dir: PathBuf::from("./data"),
            schema_dir: None,
            mono_database: false,
            pool_max_connections: 10,
            pool_acquire_timeout: Duration::from_secs(30),
            worker_concurrency: 5,
            worker_poll_interval: Duration::from_millis(1000),
            init_poll_interval: Duration::from_millis(100),
            init_wait_timeout: Duration::from_secs(60),
        }
    }
}

impl PlatformConfig {
    /// `.env` (if present), then the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_manager(&ConfigManager::layered(&[Source::DotEnv(None), Source::env()])?)
    }

    /// A config file, overridden by the process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let manager = ConfigManager::layered(&[Source::file(path.as_ref())?, Source::env()])?;
        Self::from_manager(&manager)
    }

    /// Read every setting from `manager`, falling back to the defaults,
    /// and validate the result.
    pub fn from_manager(manager: &ConfigManager) -> Result<Self> {
        let defaults = Self::default();
        let text = |key: &str, default: String| manager.text(key).unwrap_or(default);
        let millis = |key: &str, default: Duration| -> Result<Duration> {
            Ok(manager.parse(key)?.map(Duration::from_millis).unwrap_or(default))
        };
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            Ok(manager.parse(key)?.map(Duration::from_secs).unwrap_or(default))
        };

        let config = Self {
            database: DatabaseSettings {
                user: text("db_user", defaults.database.user),
                password: text("db_password", defaults.database.password),
                host: text("db_host", defaults.database.host),
                port: manager.parse("db_port")?.unwrap_or(defaults.database.port),
                name: text("db_name", defaults.database.name),
            },
            data_dir: manager.text("data_dir").map(PathBuf::from).unwrap_or(defaults.data_dir),
            schema_dir: manager
                .text("schema_dir")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            mono_database: manager.flag("mono_database")?.unwrap_or(false),
            pool_max_connections: manager
                .parse("bamz_pool_max_connections")?
                .unwrap_or(defaults.pool_max_connections),
            pool_acquire_timeout: secs("bamz_pool_acquire_timeout_secs", defaults.pool_acquire_timeout)?,
            worker_concurrency: manager
                .parse("bamz_worker_concurrency")?
                .unwrap_or(defaults.worker_concurrency),
            worker_poll_interval: millis("bamz_worker_poll_ms", defaults.worker_poll_interval)?,
            init_poll_interval: millis("bamz_init_poll_ms", defaults.init_poll_interval)?,
            init_wait_timeout: secs("bamz_init_timeout_secs", defaults.init_wait_timeout)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// `<data_dir>/apps`
    pub fn apps_dir(&self) -> PathBuf {
        self.data_dir.join("apps")
    }
}

impl Validate for PlatformConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::new()
            .non_empty("DB_USER", &self.database.user)
            .non_empty("DB_HOST", &self.database.host)
            .port("DB_PORT", self.database.port)
            .identifier("DB_NAME", &self.database.name)
            .within("BAMZ_POOL_MAX_CONNECTIONS", self.pool_max_connections, 1, 1000)
            .within("BAMZ_WORKER_CONCURRENCY", self.worker_concurrency, 1, 256)
            .positive("BAMZ_WORKER_POLL_MS", self.worker_poll_interval)
            .positive("BAMZ_INIT_POLL_MS", self.init_poll_interval)
            .finish()
    }
}
