//! Plugins for bamz tenants.
//!
//! A [`Plugin`] extends tenant databases with its own schema. Plugins are
//! registered once per process in a [`PluginRegistry`]; which ones a tenant
//! has is recorded in its `openbamz.plugins` table.
//!
//! - [`sort_by_dependency`] orders plugins so dependencies come first and
//!   leaves out plugins caught in a cycle.
//! - [`PluginInstaller`] installs and removes plugins per tenant and tells
//!   the tenant caches about it.
//! - [`MembershipCache`] answers "does this tenant have plugin X" for
//!   request guards.

pub mod error;
pub mod installer;
pub mod membership;
pub mod plugin;
pub mod registry;
pub mod sort;

pub use error::{PluginError, PluginResult};
pub use installer::PluginInstaller;
pub use membership::MembershipCache;
pub use plugin::{CleanContext, Plugin, PluginTask, PrepareContext, TaskContext};
pub use registry::PluginRegistry;
pub use sort::{DependencyNode, PluginSpec, SortOutcome, sort_by_dependency};
