//! Rule checks run after a config is assembled.

use crate::{ConfigError, Result};

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Collects every failed rule instead of stopping at the first.
///
/// ```
/// use bamz_config::ConfigValidator;
///
/// let err = ConfigValidator::new()
///     .non_empty("DB_USER", "")
///     .port("DB_PORT", 0)
///     .finish()
///     .unwrap_err();
/// assert!(err.to_string().contains("DB_PORT"));
/// ```
#[derive(Debug, Default)]
pub struct ConfigValidator {
    failures: Vec<String>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(mut self, ok: bool, failure: impl FnOnce() -> String) -> Self {
        if !ok {
            self.failures.push(failure());
        }
        self
    }

    pub fn non_empty(self, key: &str, value: &str) -> Self {
        self.check(!value.trim().is_empty(), || format!("{} cannot be empty", key))
    }

    pub fn port(self, key: &str, value: u16) -> Self {
        self.check(value != 0, || format!("{} must be a valid port number", key))
    }

    pub fn within<T>(self, key: &str, value: T, min: T, max: T) -> Self
    where
        T: PartialOrd + std::fmt::Display,
    {
        let ok = value >= min && value <= max;
        self.check(ok, || format!("{} must be between {} and {} (got {})", key, min, max, value))
    }

    /// Lowercase bare SQL identifier of at most 63 bytes.
    pub fn identifier(self, key: &str, value: &str) -> Self {
        let mut chars = value.chars();
        let ok = value.len() <= 63
            && chars.next().is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        self.check(ok, || format!("{} must be a lowercase SQL identifier (got '{}')", key, value))
    }

    pub fn positive(self, key: &str, value: std::time::Duration) -> Self {
        self.check(!value.is_zero(), || format!("{} must be greater than zero", key))
    }

    pub fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Rejected(self.failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_passing_rules() {
        ConfigValidator::new()
            .non_empty("DB_USER", "postgres")
            .port("DB_PORT", 5432)
            .within("BAMZ_WORKER_CONCURRENCY", 5, 1, 256)
            .identifier("DB_NAME", "_open_bamz2")
            .positive("BAMZ_INIT_POLL_MS", Duration::from_millis(100))
            .finish()
            .unwrap();
    }

    #[test]
    fn test_all_failures_are_reported() {
        let err = ConfigValidator::new()
            .non_empty("DB_USER", "   ")
            .within("BAMZ_WORKER_CONCURRENCY", 0, 1, 256)
            .identifier("DB_NAME", "Bamz")
            .finish()
            .unwrap_err();

        let ConfigError::Rejected(failures) = err else {
            panic!("expected rejected config");
        };
        assert_eq!(failures.len(), 3);
    }

    #[test]
    fn test_identifier_rule() {
        let bad = |value: &str| ConfigValidator::new().identifier("DB_NAME", value).finish().is_err();
        assert!(!bad("bamz"));
        assert!(bad("2bamz"));
        assert!(bad("bamz; drop"));
        assert!(bad(&"a".repeat(64)));
        assert!(bad(""));
    }
}
