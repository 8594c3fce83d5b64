//! Per-tenant directories on disk.
//!
//! ```text
//! <data_dir>/apps/<code>/
//!     public/index.html
//!     branches/
//! ```

use crate::TenantResult;
use crate::tenant::validate_code;
use bamz_config::PlatformConfig;
use bamz_log::debug;
use std::path::{Path, PathBuf};

/// Filesystem layout of tenant directories.
#[derive(Debug, Clone)]
pub struct TenantFiles {
    apps_dir: PathBuf,
}

impl TenantFiles {
    pub fn new(apps_dir: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(config.apps_dir())
    }

    pub fn apps_dir(&self) -> &Path {
        &self.apps_dir
    }

    /// Root directory of `code`.
    pub fn root(&self, code: &str) -> TenantResult<PathBuf> {
        validate_code(code)?;
        Ok(self.apps_dir.join(code))
    }

    pub fn public_dir(&self, code: &str) -> TenantResult<PathBuf> {
        Ok(self.root(code)?.join("public"))
    }

    pub fn branches_dir(&self, code: &str) -> TenantResult<PathBuf> {
        Ok(self.root(code)?.join("branches"))
    }

    /// Directory handed to plugins for their own files.
    pub fn files_directory(&self, code: &str) -> TenantResult<PathBuf> {
        self.root(code)
    }

    /// Create the directory tree and a starter page if none exists.
    pub async fn prepare(&self, code: &str) -> TenantResult<()> {
        let public = self.public_dir(code)?;
        tokio::fs::create_dir_all(&public).await?;
        tokio::fs::create_dir_all(self.branches_dir(code)?).await?;

        let index = public.join("index.html");
        if !tokio::fs::try_exists(&index).await? {
            debug!(target: "bamz::files", "Writing starter page for {}", code);
            tokio::fs::write(&index, starter_page(code)).await?;
        }
        Ok(())
    }

    /// Remove the whole tree of `code`.
    pub async fn delete(&self, code: &str) -> TenantResult<()> {
        match tokio::fs::remove_dir_all(self.root(code)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn starter_page(code: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"utf-8\">\n  <title>{code}</title>\n</head>\n<body>\n  <h1>{code}</h1>\n</body>\n</html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bamz_testing::TestDataDir;

    #[tokio::test]
    async fn test_prepare_and_delete() {
        let data = TestDataDir::new().unwrap();
        let files = TenantFiles::new(data.apps_dir());

        files.prepare("shop1").await.unwrap();
        let root = data.tenant_dir("shop1");
        assert!(root.join("branches").is_dir());

        let index = std::fs::read_to_string(root.join("public").join("index.html")).unwrap();
        assert!(index.contains("<title>shop1</title>"));

        files.delete("shop1").await.unwrap();
        assert!(!root.exists());
        files.delete("shop1").await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_page_is_kept() {
        let data = TestDataDir::new().unwrap();
        let files = TenantFiles::new(data.apps_dir());
        let public = data.tenant_dir("shop1").join("public");
        std::fs::create_dir_all(&public).unwrap();
        std::fs::write(public.join("index.html"), "custom").unwrap();

        files.prepare("shop1").await.unwrap();
        assert_eq!(std::fs::read_to_string(public.join("index.html")).unwrap(), "custom");
    }

    #[test]
    fn test_codes_cannot_escape_apps_dir() {
        let files = TenantFiles::new("/srv/bamz/apps");
        assert!(files.root("..").is_err());
        assert!(files.root("shop1/../../etc").is_err());
        assert_eq!(
            files.branches_dir("shop1").unwrap(),
            PathBuf::from("/srv/bamz/apps/shop1/branches")
        );
    }
}
