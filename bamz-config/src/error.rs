use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse {path} as {format}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("No configuration format for {0}")]
    UnknownFormat(PathBuf),

    #[error("Cannot load .env file: {0}")]
    DotEnv(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    /// One entry per failed rule
    #[error("Invalid configuration: {}", .0.join("; "))]
    Rejected(Vec<String>),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
