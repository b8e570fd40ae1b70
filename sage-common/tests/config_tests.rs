//! Tests for bootstrap configuration and root folder resolution
//!
//! Tests that manipulate SAGE_ROOT_FOLDER or API key variables are marked
//! with #[serial] so they do not race each other.

use sage_common::config::{
    load_toml_config, write_toml_config, LoggingConfig, ProviderEndpoint, RootFolderInitializer,
    RootFolderResolver, StoreBackend, TomlConfig, ROOT_FOLDER_ENV, SEARCH_API_KEY_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.port, 5740);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.store, StoreBackend::File);
    assert!(config.search.base_url.is_none());
    assert_eq!(config.scoring.requests_per_second, 2);
}

#[test]
fn test_partial_config_file_fills_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("sage.toml");
    std::fs::write(
        &path,
        r#"
port = 6000
store = "sqlite"

[search]
base_url = "http://localhost:9000"
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.port, 6000);
    assert_eq!(config.store, StoreBackend::Sqlite);
    assert_eq!(config.search.base_url.as_deref(), Some("http://localhost:9000"));
    assert_eq!(config.search.timeout_secs, 30);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_config_file_is_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("sage.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
fn test_write_then_load_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("nested").join("sage.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/sage")),
        port: 7001,
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        store: StoreBackend::Sqlite,
        search: ProviderEndpoint::default(),
        scoring: ProviderEndpoint {
            base_url: Some("http://scoring".to_string()),
            ..ProviderEndpoint::default()
        },
    };
    write_toml_config(&config, &path).unwrap();

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded.root_folder, Some(PathBuf::from("/srv/sage")));
    assert_eq!(loaded.port, 7001);
    assert_eq!(loaded.logging.level, "debug");
    assert_eq!(loaded.scoring.base_url.as_deref(), Some("http://scoring"));
}

#[test]
#[serial]
fn test_resolver_cli_arg_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/sage-env-root");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/sage-toml-root")),
        ..TomlConfig::default()
    };
    let resolved = RootFolderResolver::new("test")
        .with_cli_arg(Some(PathBuf::from("/tmp/sage-cli-root")))
        .with_toml_config(&config)
        .resolve();

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(resolved, PathBuf::from("/tmp/sage-cli-root"));
}

#[test]
#[serial]
fn test_resolver_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/sage-env-root");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/sage-toml-root")),
        ..TomlConfig::default()
    };
    let resolved = RootFolderResolver::new("test")
        .with_toml_config(&config)
        .resolve();

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(resolved, PathBuf::from("/tmp/sage-env-root"));
}

#[test]
#[serial]
fn test_resolver_falls_back_to_toml_then_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/sage-toml-root")),
        ..TomlConfig::default()
    };
    let from_toml = RootFolderResolver::new("test")
        .with_toml_config(&config)
        .resolve();
    assert_eq!(from_toml, PathBuf::from("/tmp/sage-toml-root"));

    let from_default = RootFolderResolver::new("test").resolve();
    assert_eq!(from_default, sage_common::config::default_root_folder());
}

#[test]
#[serial]
fn test_api_key_env_overrides_toml() {
    let endpoint = ProviderEndpoint {
        api_key: Some("toml-key".to_string()),
        ..ProviderEndpoint::default()
    };

    env::remove_var(SEARCH_API_KEY_ENV);
    assert_eq!(
        endpoint.resolve_api_key(SEARCH_API_KEY_ENV).as_deref(),
        Some("toml-key")
    );

    env::set_var(SEARCH_API_KEY_ENV, "env-key");
    let resolved = endpoint.resolve_api_key(SEARCH_API_KEY_ENV);
    env::remove_var(SEARCH_API_KEY_ENV);
    assert_eq!(resolved.as_deref(), Some("env-key"));
}

#[test]
fn test_initializer_creates_sessions_dir() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path().join("sage-root");
    let initializer = RootFolderInitializer::new(root.clone());

    initializer.ensure_directory_exists().unwrap();

    assert!(initializer.sessions_dir().is_dir());
    assert_eq!(initializer.database_path(), root.join("sage.db"));
    assert_eq!(initializer.root_folder(), root.as_path());
}
