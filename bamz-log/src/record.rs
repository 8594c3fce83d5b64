//! Rendering of a single log line.

use crate::{Format, Level, LogConfig};
use std::fmt::Write as _;

/// One event, borrowed from the call site.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub level: Level,
    pub target: &'a str,
    pub message: &'a str,
    pub fields: &'a [(&'a str, String)],
}

impl Record<'_> {
    pub fn render(&self, config: &LogConfig) -> String {
        match config.format {
            Format::Json => self.json(),
            Format::Pretty => {
                let stamp = config
                    .timestamps
                    .then(|| chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string());
                let target = (config.module_path && !self.target.is_empty())
                    .then(|| format!("[{}] ", self.target));
                self.line(stamp, &self.level_label(config), target)
            }
            Format::Compact => {
                let stamp = config
                    .timestamps
                    .then(|| chrono::Local::now().format("%H:%M:%S").to_string());
                let initial = self.level.as_str()[..1].to_string();
                let target = (config.module_path && !self.target.is_empty())
                    .then(|| format!("{}: ", self.target));
                self.line(stamp, &initial, target)
            }
        }
    }

    fn line(&self, stamp: Option<String>, level: &str, target: Option<String>) -> String {
        let mut out = String::new();
        if let Some(stamp) = stamp {
            out.push_str(&stamp);
            out.push(' ');
        }
        out.push_str(level);
        out.push(' ');
        out.push_str(target.as_deref().unwrap_or(""));
        out.push_str(self.message);
        for (key, value) in self.fields {
            if value.is_empty() || value.contains(char::is_whitespace) {
                let _ = write!(out, " {}={:?}", key, value);
            } else {
                let _ = write!(out, " {}={}", key, value);
            }
        }
        out
    }

    #[cfg(feature = "color")]
    fn level_label(&self, config: &LogConfig) -> String {
        use colored::Colorize;
        let label = format!("{:5}", self.level.as_str());
        if !config.color {
            return label;
        }
        match self.level {
            Level::Trace => label.magenta(),
            Level::Debug => label.blue(),
            Level::Info => label.green(),
            Level::Warn => label.yellow(),
            Level::Error => label.red().bold(),
            Level::Off => label.normal(),
        }
        .to_string()
    }

    #[cfg(not(feature = "color"))]
    fn level_label(&self, _config: &LogConfig) -> String {
        format!("{:5}", self.level.as_str())
    }

    fn json(&self) -> String {
        let mut entry = serde_json::Map::new();
        entry.insert("timestamp".into(), chrono::Utc::now().to_rfc3339().into());
        entry.insert("level".into(), self.level.as_str().into());
        entry.insert("target".into(), self.target.into());
        entry.insert("message".into(), self.message.into());
        for (key, value) in self.fields {
            entry.insert((*key).to_string(), value.as_str().into());
        }
        serde_json::Value::Object(entry).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(format: Format) -> LogConfig {
        LogConfig {
            format,
            timestamps: false,
            color: false,
            ..LogConfig::default()
        }
    }

    fn failing_query<'a>(fields: &'a [(&'a str, String)]) -> Record<'a> {
        Record {
            level: Level::Error,
            target: "bamz::pool",
            message: "Error while running query",
            fields,
        }
    }

    #[test]
    fn test_pretty_line_quotes_spaced_values() {
        let fields = [("query", "SELECT 1".to_string()), ("code", "42P01".to_string())];
        assert_eq!(
            failing_query(&fields).render(&plain(Format::Pretty)),
            "ERROR [bamz::pool] Error while running query query=\"SELECT 1\" code=42P01"
        );
    }

    #[test]
    fn test_compact_line() {
        let record = Record {
            level: Level::Warn,
            target: "bamz",
            message: "slow",
            fields: &[],
        };
        assert_eq!(record.render(&plain(Format::Compact)), "W bamz: slow");

        let untargeted = LogConfig {
            module_path: false,
            ..plain(Format::Compact)
        };
        assert_eq!(record.render(&untargeted), "W slow");
    }

    #[test]
    fn test_json_line_carries_fields() {
        let fields = [("task", "add-plugin".to_string())];
        let line = failing_query(&fields).render(&plain(Format::Json));

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["level"], "ERROR");
        assert_eq!(parsed["target"], "bamz::pool");
        assert_eq!(parsed["task"], "add-plugin");
        assert!(parsed["timestamp"].is_string());
    }
}
