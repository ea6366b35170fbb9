//! Integration tests for pfs-config
//!
//! These tests verify the config loading pipeline with real file system operations.

use pfs_config::{Config, ReadMode};
use std::path::PathBuf;
use tempfile::tempdir;

/// Test config loading from a real config file
#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let pfs_dir = temp.path().join(".pfs");
    std::fs::create_dir_all(&pfs_dir).unwrap();

    let config_content = r#"
[read]
mode = "file"
cache_line_size = 4096
max_plan_retries = 3

[metadata]
socket = "/tmp/proxyfsd.sock"
mount_id = 7

[blob]
root = "/srv/blobs"
pool_size = 2
acquire_timeout_ms = 250
"#;
    std::fs::write(pfs_dir.join("config.toml"), config_content).unwrap();

    let config = Config::from_file(&pfs_dir.join("config.toml")).unwrap();

    assert_eq!(config.read.mode, ReadMode::File);
    assert_eq!(config.read.cache_line_size, 4096);
    assert_eq!(config.read.max_plan_retries, 3);
    assert_eq!(config.metadata.socket, PathBuf::from("/tmp/proxyfsd.sock"));
    assert_eq!(config.metadata.mount_id, 7);
    assert_eq!(config.blob.root, PathBuf::from("/srv/blobs"));
    assert_eq!(config.blob.pool_size, 2);
    assert_eq!(
        config.blob.acquire_timeout(),
        Some(std::time::Duration::from_millis(250))
    );
    assert!(config.validate().is_ok());
}

/// Test config hierarchy: project config overrides global
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();

    let global_path = temp.path().join("global.toml");
    std::fs::write(
        &global_path,
        r#"
[read]
mode = "none"
cache_line_size = 8192

[metadata]
mount_id = 3
"#,
    )
    .unwrap();

    let project_path = temp.path().join("project.toml");
    std::fs::write(
        &project_path,
        r#"
[read]
mode = "file"
"#,
    )
    .unwrap();

    let mut config = Config::from_file(&global_path).unwrap();
    config.merge(Config::from_file(&project_path).unwrap());

    // mode replaced, the rest preserved from global
    assert_eq!(config.read.mode, ReadMode::File);
    assert_eq!(config.read.cache_line_size, 8192);
    assert_eq!(config.metadata.mount_id, 3);
}

/// Test partial config with defaults filling in
#[test]
fn test_partial_config_defaults_applied() {
    let config: Config = toml::from_str("[read]\nmode = \"none\"\n").unwrap();

    assert_eq!(config.read.mode, ReadMode::None);
    assert_eq!(config.read.cache_line_size, 65536);
    assert_eq!(config.blob.pool_size, 16);
    assert!(config.cache.capacity_bytes.is_none());
}

/// Test invalid mode string is a parse error
#[test]
fn test_unknown_mode_rejected() {
    let result: Result<Config, _> = toml::from_str("[read]\nmode = \"bimodal\"\n");
    assert!(result.is_err());
}

/// Test complete config serialization/deserialization cycle through a file
#[test]
fn test_config_full_roundtrip_with_all_sections() {
    let mut original = Config::default();
    original.cache.capacity_bytes = Some(1 << 20);

    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    std::fs::write(&config_path, toml::to_string_pretty(&original).unwrap()).unwrap();

    let loaded = Config::from_file(&config_path).unwrap();

    assert_eq!(original.read.mode, loaded.read.mode);
    assert_eq!(original.read.max_plan_retries, loaded.read.max_plan_retries);
    assert_eq!(original.metadata.socket, loaded.metadata.socket);
    assert_eq!(original.blob.root, loaded.blob.root);
    assert_eq!(loaded.cache.capacity_bytes, Some(1 << 20));
}
