// Filesystem and credential fixtures

use crate::SimulatedCluster;
use bamz_db::CredentialSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Name of the platform database in fixtures.
pub const PLATFORM_DB: &str = "bamz";

/// A throwaway data directory removed on drop.
pub struct TestDataDir {
    dir: TempDir,
}

impl TestDataDir {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("bamz-test-").tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `<root>/apps`
    pub fn apps_dir(&self) -> PathBuf {
        self.dir.path().join("apps")
    }

    /// `<root>/apps/<code>`
    pub fn tenant_dir(&self, code: &str) -> PathBuf {
        self.apps_dir().join(code)
    }
}

/// Superuser credentials against the fixture platform database.
pub fn platform_credentials() -> CredentialSet {
    SimulatedCluster::superuser(PLATFORM_DB)
}

/// A simulated cluster that already holds the platform database.
pub fn platform_cluster() -> SimulatedCluster {
    SimulatedCluster::new().with_database(PLATFORM_DB)
}
