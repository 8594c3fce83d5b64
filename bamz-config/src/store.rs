//! Layered key/value store.

use crate::{ConfigError, Result, Source};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Flat store of lowercase keys; each [`Source`] loaded overrides the keys
/// it defines. Clones share the same values.
#[derive(Clone, Default)]
pub struct ConfigManager {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store populated from `sources`, in order.
    pub fn layered(sources: &[Source]) -> Result<Self> {
        let manager = Self::new();
        for source in sources {
            manager.load(source)?;
        }
        Ok(manager)
    }

    /// Read `source` and apply it over the current values. Returns the
    /// number of keys it set.
    pub fn load(&self, source: &Source) -> Result<usize> {
        let entries = source.read()?;
        let count = entries.len();
        self.values.write().extend(entries);
        Ok(count)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.values.write().insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Raw text of `key`. Env sources give strings, file sources may give
    /// numbers or booleans; both come back as text. Null counts as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.values.read().get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }

    /// `key` parsed as `T`, `None` when absent.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.text(key)
            .map(|raw| raw.parse::<T>().map_err(|e| ConfigError::invalid(key, e.to_string())))
            .transpose()
    }

    /// `1/0`, `true/false`, `yes/no` or `on/off`. An empty value is false.
    pub fn flag(&self, key: &str) -> Result<Option<bool>> {
        let Some(raw) = self.text(key) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(ConfigError::invalid(key, format!("'{}' is not a boolean", raw))),
        }
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("ConfigManager").field("keys", &keys).finish()
    }
}
