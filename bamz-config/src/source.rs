//! Where configuration values come from.

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    /// `KEY=value` lines, as in `.env`
    Env,
}

impl FileFormat {
    /// Format implied by a file name. `.env` and `prod.env` are both env
    /// files.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name == ".env" {
            return Some(FileFormat::Env);
        }
        match name.rsplit_once('.')?.1 {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FileFormat::Json => "JSON",
            FileFormat::Toml => "TOML",
            FileFormat::Env => "env",
        }
    }

    /// Top-level entries of `content`, keys lowercased.
    pub fn parse(self, content: &str) -> std::result::Result<Map<String, Value>, String> {
        let value = match self {
            FileFormat::Json => serde_json::from_str::<Value>(content).map_err(|e| e.to_string())?,
            FileFormat::Toml => {
                let table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;
                serde_json::to_value(table).map_err(|e| e.to_string())?
            }
            FileFormat::Env => Value::Object(env_lines(content)),
        };

        match value {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| (key.to_ascii_lowercase(), value))
                .collect()),
            other => Err(format!("expected a table at the top level, found {}", other)),
        }
    }
}

fn env_lines(content: &str) -> Map<String, Value> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix("export ").unwrap_or(line).split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_ascii_lowercase(), Value::String(unquoted.to_string()))
        })
        .collect()
}

/// One layer of configuration.
#[derive(Debug, Clone)]
pub enum Source {
    /// Process environment. With a prefix only `PREFIX_*` variables are
    /// read and the prefix is stripped.
    Environment { prefix: Option<String> },
    /// A `.env` file merged into the process environment. `None` searches
    /// the working directory and its parents and tolerates absence.
    DotEnv(Option<PathBuf>),
    File { path: PathBuf, format: FileFormat },
}

impl Source {
    pub fn env() -> Self {
        Source::Environment { prefix: None }
    }

    pub fn prefixed_env(prefix: impl Into<String>) -> Self {
        Source::Environment {
            prefix: Some(prefix.into()),
        }
    }

    /// File source with the format taken from the file name.
    pub fn file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = FileFormat::detect(&path).ok_or_else(|| ConfigError::UnknownFormat(path.clone()))?;
        Ok(Source::File { path, format })
    }

    pub(crate) fn read(&self) -> Result<Map<String, Value>> {
        match self {
            Source::Environment { prefix } => Ok(from_vars(prefix.as_deref(), std::env::vars())),
            Source::DotEnv(path) => {
                match path {
                    Some(path) => {
                        dotenvy::from_path(path).map_err(|e| ConfigError::DotEnv(e.to_string()))?;
                    }
                    None => {
                        if let Err(e) = dotenvy::dotenv()
                            && !e.not_found()
                        {
                            return Err(ConfigError::DotEnv(e.to_string()));
                        }
                    }
                }
                Ok(from_vars(None, std::env::vars()))
            }
            Source::File { path, format } => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                format.parse(&content).map_err(|message| ConfigError::Parse {
                    path: path.clone(),
                    format: format.label(),
                    message,
                })
            }
        }
    }
}

fn from_vars(prefix: Option<&str>, vars: impl IntoIterator<Item = (String, String)>) -> Map<String, Value> {
    vars.into_iter()
        .filter_map(|(key, value)| {
            let key = match prefix {
                Some(prefix) => key.strip_prefix(prefix)?.strip_prefix('_')?.to_string(),
                None => key,
            };
            (!key.is_empty()).then(|| (key.to_ascii_lowercase(), Value::String(value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(FileFormat::detect(Path::new("/etc/bamz/bamz.toml")), Some(FileFormat::Toml));
        assert_eq!(FileFormat::detect(Path::new("settings.JSON")), Some(FileFormat::Json));
        assert_eq!(FileFormat::detect(Path::new(".env")), Some(FileFormat::Env));
        assert_eq!(FileFormat::detect(Path::new("prod.env")), Some(FileFormat::Env));
        assert_eq!(FileFormat::detect(Path::new("bamz.yaml")), None);
        assert_eq!(FileFormat::detect(Path::new("bamz")), None);
        assert!(Source::file("bamz").is_err());
    }

    #[test]
    fn test_toml_scalars_survive() {
        let map = FileFormat::Toml
            .parse("DB_HOST = \"db.internal\"\nbamz_worker_concurrency = 3")
            .unwrap();
        assert_eq!(map["db_host"], "db.internal");
        assert_eq!(map["bamz_worker_concurrency"], 3);
    }

    #[test]
    fn test_env_lines() {
        let map = FileFormat::Env
            .parse("DB_USER=postgres\n# comment\n\nexport DATA_DIR=\"/srv/bamz\"\nDB_PASSWORD='p=w'")
            .unwrap();
        assert_eq!(map["db_user"], "postgres");
        assert_eq!(map["data_dir"], "/srv/bamz");
        assert_eq!(map["db_password"], "p=w");
    }

    #[test]
    fn test_json_must_be_an_object() {
        assert!(FileFormat::Json.parse("[1, 2]").is_err());
        assert!(FileFormat::Json.parse("{\"db_port\": 5432}").is_ok());
    }

    #[test]
    fn test_prefix_is_stripped() {
        let map = from_vars(
            Some("BAMZ"),
            vars(&[("BAMZ_WORKER_POLL_MS", "250"), ("DB_USER", "postgres"), ("BAMZ", "x"), ("BAMZX_Y", "z")]),
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map["worker_poll_ms"], "250");
    }
}
