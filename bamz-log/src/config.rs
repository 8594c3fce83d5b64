use crate::{Format, Level};

/// Output settings, read once from `BAMZ_*` variables.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub debug: bool,
    pub level: Level,
    pub format: Format,
    pub color: bool,
    pub timestamps: bool,
    /// Print the target (`bamz::pool`) of each line
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Pretty,
            color: false,
            timestamps: true,
            module_path: true,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| {
            lookup(name).map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        };

        let debug = flag("BAMZ_DEBUG").unwrap_or(false);
        let level = lookup("BAMZ_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        Self {
            debug,
            level,
            format: lookup("BAMZ_LOG_FORMAT")
                .and_then(|s| Format::parse(&s))
                .unwrap_or(Format::Pretty),
            color: flag("BAMZ_LOG_COLOR")
                .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some()),
            timestamps: flag("BAMZ_LOG_TIMESTAMPS").unwrap_or(true),
            module_path: flag("BAMZ_LOG_MODULE").unwrap_or(true),
        }
    }
}
