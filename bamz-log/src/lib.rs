//! Logging for bamz.
//!
//! Leveled, optionally structured logging shared by every bamz crate.
//!
//! ```rust
//! use bamz_log::{debug, error, info};
//!
//! info!("Platform database ready");
//! debug!(target: "bamz::pool", "Creating pool for {}", "shop1");
//!
//! let sql = "SELECT 1";
//! error!(kv: [("query", sql), ("params", "[]")], "Error while running query");
//! ```
//!
//! | variable | effect |
//! |---|---|
//! | `BAMZ_DEBUG=1` | debug lines on |
//! | `BAMZ_LOG_LEVEL` | `trace`, `debug`, `info`, `warn`, `error` or `off` |
//! | `BAMZ_LOG_FORMAT` | `pretty`, `compact` or `json` |
//! | `BAMZ_LOG_COLOR` | colored level labels (`color` feature) |
//! | `BAMZ_LOG_TIMESTAMPS` | leading timestamp |
//! | `BAMZ_LOG_MODULE` | print the target |

mod config;
mod level;
mod record;
mod scoped;

pub use config::LogConfig;
pub use level::{Format, Level};
pub use record::Record;
pub use scoped::ScopedLogger;

use once_cell::sync::Lazy;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

static CONFIG: Lazy<LogConfig> = Lazy::new(|| {
    let config = LogConfig::from_env();
    DEBUG.store(config.debug, Ordering::SeqCst);
    THRESHOLD.store(config.level as u8, Ordering::SeqCst);
    config
});

static DEBUG: AtomicBool = AtomicBool::new(false);
static THRESHOLD: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Read the environment and route `log` facade records (sqlx) into the
/// same sink. Later calls are no-ops.
pub fn init() {
    let config = Lazy::force(&CONFIG);
    if log::set_logger(&Bridge).is_ok() {
        log::set_max_level(config.level.filter());
    }
}

pub fn config() -> &'static LogConfig {
    &CONFIG
}

#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    Lazy::force(&CONFIG);
    match level {
        Level::Off => false,
        Level::Debug if is_debug_enabled() => true,
        _ => level >= current_level(),
    }
}

pub fn current_level() -> Level {
    Level::from_u8(THRESHOLD.load(Ordering::Relaxed))
}

pub fn set_level(level: Level) {
    Lazy::force(&CONFIG);
    THRESHOLD.store(level as u8, Ordering::SeqCst);
    log::set_max_level(level.filter());
}

/// Debug mode also lowers the threshold to `Debug`.
pub fn set_debug(enabled: bool) {
    Lazy::force(&CONFIG);
    DEBUG.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    log_kv(level, target, message, &[]);
}

#[doc(hidden)]
pub fn log_kv(level: Level, target: &str, message: &str, fields: &[(&str, String)]) {
    if !is_level_enabled(level) {
        return;
    }
    let line = Record {
        level,
        target,
        message,
        fields,
    }
    .render(config());
    let _ = writeln!(std::io::stderr().lock(), "{}", line);
}

struct Bridge;

impl log::Log for Bridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        is_level_enabled(metadata.level().into())
    }

    fn log(&self, record: &log::Record<'_>) {
        log(record.level().into(), record.target(), &record.args().to_string());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __bamz_log {
    ($level:expr, target: $target:expr, kv: [$(($key:expr, $value:expr)),* $(,)?], $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::log_kv(
                $level,
                $target,
                &format!($($arg)+),
                &[$(($key, ($value).to_string())),*],
            );
        }
    };
    ($level:expr, target: $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::log($level, $target, &format!($($arg)+));
        }
    };
    ($level:expr, kv: [$(($key:expr, $value:expr)),* $(,)?], $($arg:tt)+) => {
        $crate::__bamz_log!($level, target: module_path!(), kv: [$(($key, $value)),*], $($arg)+)
    };
    ($level:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::log($level, module_path!(), &format!($($arg)+));
        }
    };
}

/// Log a trace message.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__bamz_log!($crate::Level::Trace, $($arg)+) };
}

/// Log a debug message.
///
/// Enabled by `BAMZ_DEBUG=1` or `BAMZ_LOG_LEVEL=debug`.
///
/// ```rust
/// use bamz_log::debug;
///
/// let tenant = "shop1";
/// debug!("Provisioning {}", tenant);
/// debug!(target: "bamz::registry", "Cache miss for {}", tenant);
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__bamz_log!($crate::Level::Debug, $($arg)+) };
}

/// Log an info message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__bamz_log!($crate::Level::Info, $($arg)+) };
}

/// Log a warning message.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__bamz_log!($crate::Level::Warn, $($arg)+) };
}

/// Log an error message.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__bamz_log!($crate::Level::Error, $($arg)+) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_and_debug_switch() {
        let level = current_level();
        let debug = is_debug_enabled();

        set_level(Level::Error);
        set_debug(false);
        assert!(!is_level_enabled(Level::Warn));
        assert!(is_level_enabled(Level::Error));
        assert!(!is_level_enabled(Level::Off));

        set_debug(true);
        assert!(is_level_enabled(Level::Debug));
        assert_eq!(current_level(), Level::Debug);

        set_debug(debug);
        set_level(level);
    }

    #[test]
    fn test_macro_forms() {
        trace!("trace message");
        debug!("debug {}", 42);
        info!(target: "bamz::test", "with target");
        warn!(kv: [("tenant", "shop1")], "with fields");
        error!(target: "bamz::test", kv: [("attempt", 3), ("task", "drop-database")], "both");
    }
}
