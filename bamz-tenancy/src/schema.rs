//! Named schema definitions.

use crate::{TenantError, TenantResult};
use bamz_config::PlatformConfig;
use std::path::PathBuf;

const INIT_BASE: &str = include_str!("../sql/init_base.sql");
const OPENBAMZ: &str = include_str!("../sql/_openbamz.sql");
const WORKER: &str = include_str!("../sql/worker.sql");

/// Schema applied to every tenant database.
pub const TENANT_BASE_SCHEMA: &str = "init_base";

/// Schema applied to the platform database.
pub const PLATFORM_SCHEMA: &str = "_openbamz";

/// Resolves a schema id to the SQL script that creates it.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    dir: Option<PathBuf>,
}

impl SchemaCatalog {
    /// Catalog backed by the built-in definitions only.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Catalog reading `<dir>/<id>.sql`.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self {
            dir: config.schema_dir.clone(),
        }
    }

    /// Load the script for `id`.
    pub async fn load(&self, id: &str) -> TenantResult<String> {
        if let Some(dir) = &self.dir {
            if id.contains(['/', '\\']) || id.contains("..") {
                return Err(TenantError::UnknownSchema(id.to_string()));
            }
            let path = dir.join(format!("{}.sql", id));
            return match tokio::fs::read_to_string(&path).await {
                Ok(sql) => Ok(sql),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(TenantError::UnknownSchema(id.to_string()))
                }
                Err(e) => Err(e.into()),
            };
        }

        Self::builtin_script(id).ok_or_else(|| TenantError::UnknownSchema(id.to_string()))
    }

    fn builtin_script(id: &str) -> Option<String> {
        let head = match id {
            TENANT_BASE_SCHEMA => INIT_BASE,
            PLATFORM_SCHEMA => OPENBAMZ,
            _ => return None,
        };
        Some(format!("{}\n{}", head, WORKER))
    }
}
