//! Tests for config module

use edv::config::Config;
use edv_storage::ProviderConfig;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_load_or_create_writes_defaults() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("nested/config.toml");

    let config = Config::load_or_create(&path).unwrap();
    assert!(path.exists());
    assert_eq!(config.server.bind_addr, "127.0.0.1:8081");

    let reloaded = Config::load_or_create(&path).unwrap();
    assert_eq!(reloaded.storage, config.storage);
    assert_eq!(reloaded.observability.log_format, "pretty");
}

#[test]
fn test_parse_sqlite_config() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[server]
bind_addr = "0.0.0.0:9000"
max_body_size = 1024

[storage]
backend = "sqlite"
path = "/var/lib/edv/edv.db"

[observability]
log_format = "json"
metrics_enabled = false
"#,
    )
    .unwrap();

    let config = Config::load_or_create(&path).unwrap();
    assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
    assert_eq!(config.server.max_body_size, 1024);
    assert_eq!(
        config.storage,
        ProviderConfig::Sqlite {
            path: PathBuf::from("/var/lib/edv/edv.db")
        }
    );
    assert_eq!(config.observability.log_format, "json");
    assert_eq!(config.observability.log_level, "info,edv=debug");
    assert!(!config.observability.metrics_enabled);
}

#[test]
fn test_memory_scan_queries() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[storage]
backend = "memory"
scan_queries = true
"#,
    )
    .unwrap();

    let config = Config::load_or_create(&path).unwrap();
    assert_eq!(config.storage, ProviderConfig::Memory { scan_queries: true });
    assert_eq!(config.create_provider().unwrap().backend_name(), "memory");
}

#[test]
fn test_sqlite_path_tilde_is_expanded() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[storage]
backend = "sqlite"
path = "~/.edv/edv.db"
"#,
    )
    .unwrap();

    let config = Config::load_or_create(&path).unwrap();
    let home = dirs::home_dir().unwrap();
    assert_eq!(
        config.storage,
        ProviderConfig::Sqlite {
            path: home.join(".edv/edv.db")
        }
    );
}

#[test]
fn test_save_roundtrip() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");

    let mut config = Config::default();
    config.storage = ProviderConfig::Sqlite {
        path: temp.path().join("edv.db"),
    };
    config.server.cors.enabled = true;
    config.save(&path).unwrap();

    let loaded = Config::load_or_create(&path).unwrap();
    assert_eq!(loaded.storage, config.storage);
    assert!(loaded.server.cors.enabled);
}

#[test]
fn test_invalid_backend_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[storage]\nbackend = \"mongodb\"\n").unwrap();

    assert!(Config::load_or_create(&path).is_err());
}
