//! Loading `PlatformConfig` from layered sources.

use bamz_config::{ConfigError, ConfigManager, FileFormat, PlatformConfig, Source};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

fn temp_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

#[test]
fn test_platform_config_from_toml_file() {
    let file = temp_file(
        ".toml",
        r#"
db_user = "bamz_owner"
db_host = "10.0.0.5"
db_port = 5433
data_dir = "/var/lib/bamz"
bamz_init_timeout_secs = 5
"#,
    );

    let manager = ConfigManager::layered(&[Source::file(file.path()).unwrap()]).unwrap();
    let config = PlatformConfig::from_manager(&manager).unwrap();

    assert_eq!(config.database.user, "bamz_owner");
    assert_eq!(config.database.host, "10.0.0.5");
    assert_eq!(config.database.port, 5433);
    assert_eq!(config.apps_dir(), PathBuf::from("/var/lib/bamz/apps"));
    assert_eq!(config.init_wait_timeout, Duration::from_secs(5));
}

#[test]
fn test_later_layers_win() {
    let base = temp_file(".json", r#"{"db_name": "tenants", "db_host": "a.internal"}"#);
    let overlay = temp_file(".env", "DB_HOST=b.internal\nMONO_DATABASE=1\n");

    let manager = ConfigManager::new();
    manager.load(&Source::file(base.path()).unwrap()).unwrap();
    let set = manager
        .load(&Source::File {
            path: overlay.path().to_path_buf(),
            format: FileFormat::Env,
        })
        .unwrap();
    assert_eq!(set, 2);

    let config = PlatformConfig::from_manager(&manager).unwrap();
    assert_eq!(config.database.name, "tenants");
    assert_eq!(config.database.host, "b.internal");
    assert!(config.mono_database);
}

#[test]
fn test_prefixed_env_loading() {
    unsafe {
        std::env::set_var("BAMZITEST_WORKER_POLL_MS", "50");
    }

    let manager = ConfigManager::layered(&[Source::prefixed_env("BAMZITEST")]).unwrap();
    assert_eq!(manager.parse::<u64>("worker_poll_ms").unwrap(), Some(50));

    unsafe {
        std::env::remove_var("BAMZITEST_WORKER_POLL_MS");
    }
}

#[test]
fn test_every_rule_failure_surfaces() {
    let manager = ConfigManager::new();
    manager.set("bamz_worker_concurrency", 0);
    manager.set("db_port", 0);

    let err = PlatformConfig::from_manager(&manager).unwrap_err();
    let ConfigError::Rejected(failures) = err else {
        panic!("expected a rejected config, got {:?}", err);
    };
    assert_eq!(failures.len(), 2);
}

#[test]
fn test_missing_and_malformed_files() {
    let err = Source::file("/nonexistent/bamz.toml")
        .and_then(|source| ConfigManager::layered(&[source]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));

    let broken = temp_file(".toml", "db_port = = 1");
    let err = ConfigManager::layered(&[Source::file(broken.path()).unwrap()]).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));
}
