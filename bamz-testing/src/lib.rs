//! Test support for bamz.
//!
//! [`SimulatedCluster`] implements the `bamz-db` connection seams in memory,
//! so provisioning, plugin installation and worker tasks can be exercised
//! without a running Postgres.

pub mod cluster;
pub mod fixtures;
pub mod recorder;

pub use cluster::{
    DefaultPrivilege, ObjectKind, SimulatedCluster, SimulatedConnection, SimulatedJob,
};
pub use fixtures::{PLATFORM_DB, TestDataDir, platform_cluster, platform_credentials};
pub use recorder::CallRecorder;
