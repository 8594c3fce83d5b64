//! Configuration for the bamz platform.
//!
//! Values are gathered into a [`ConfigManager`] from layered [`Source`]s
//! (`.env`, process environment, TOML/JSON/env files) and then read into
//! the typed [`PlatformConfig`].
//!
//! ```no_run
//! use bamz_config::{ConfigManager, PlatformConfig, Source};
//!
//! # fn demo() -> bamz_config::Result<()> {
//! let manager = ConfigManager::layered(&[Source::file("/etc/bamz/bamz.toml")?, Source::env()])?;
//! let config = PlatformConfig::from_manager(&manager)?;
//! println!("tenants live in {}", config.apps_dir().display());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod platform;
pub mod source;
pub mod store;
pub mod validation;

pub use error::{ConfigError, Result};
pub use platform::{DatabaseSettings, PlatformConfig};
pub use source::{FileFormat, Source};
pub use store::ConfigManager;
pub use validation::{ConfigValidator, Validate};
