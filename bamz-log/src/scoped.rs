//! Logger bound to a fixed target.

use crate::{Level, is_level_enabled, log, log_kv};

/// A cloneable logger that always writes under the same target.
///
/// Handed to worker task handlers and plugin tasks so their output is
/// attributed to the database they run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedLogger {
    target: String,
}

impl ScopedLogger {
    /// Create a logger for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Derive a logger for a nested target (`parent::child`).
    pub fn child(&self, name: &str) -> Self {
        Self::new(format!("{}::{}", self.target, name))
    }

    /// The target this logger writes under.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.write(Level::Debug, message.as_ref(), &[]);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(Level::Info, message.as_ref(), &[]);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write(Level::Warn, message.as_ref(), &[]);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(Level::Error, message.as_ref(), &[]);
    }

    /// Log with structured fields.
    pub fn with_fields(&self, level: Level, message: impl AsRef<str>, fields: &[(&str, String)]) {
        self.write(level, message.as_ref(), fields);
    }

    fn write(&self, level: Level, message: &str, fields: &[(&str, String)]) {
        if !is_level_enabled(level) {
            return;
        }
        if fields.is_empty() {
            log(level, &self.target, message);
        } else {
            log_kv(level, &self.target, message, fields);
        }
    }
}
