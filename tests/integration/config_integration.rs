//! Integration tests for the configuration system

use crate::integration::test_utils::with_xdg_env;
use feedbuild::config::{global_config_path, ConfigLoader, FeedbuildConfig};
use feedbuild::engine::WaveMode;
use feedbuild::error::FeedError;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_loads_explicit_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("feedbuild.toml");

    std::fs::write(
        &config_file,
        r#"
[dirs]
output = "/var/feedbuild/out"
publish = "/var/feedbuild/www"

[build]
queue_latency_ms = 5000
wave_mode = "concurrent"
retain_builds = 3

[http]
retries = 5
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert_eq!(config.dirs.publish, PathBuf::from("/var/feedbuild/www"));
    assert_eq!(config.build.queue_latency(), Duration::from_secs(5));
    assert_eq!(config.build.wave_mode, WaveMode::Concurrent);
    assert_eq!(config.build.retain_builds, 3);
    assert_eq!(config.http.retries, 5);
    // Untouched sections keep their defaults
    assert_eq!(config.store.path, PathBuf::from(".feedbuild/store"));
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::load_from_file(&temp_dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, FeedError::ConfigError(msg) if msg.contains("not found")));
}

#[test]
fn test_invalid_config_is_rejected_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("feedbuild.toml");
    std::fs::write(
        &config_file,
        r#"
[dirs]
output = "same"
publish = "same"
"#,
    )
    .unwrap();

    let err = ConfigLoader::load_from_file(&config_file).unwrap_err();
    assert!(matches!(err, FeedError::ConfigError(msg) if msg.contains("dirs")));
}

#[test]
fn test_workspace_file_overrides_global_file() {
    let xdg = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();

    with_xdg_env(&xdg, || {
        let global = global_config_path().expect("global config path");
        std::fs::create_dir_all(global.parent().unwrap()).unwrap();
        std::fs::write(
            &global,
            "[build]\nqueue_latency_ms = 1000\n[http]\nretries = 7\n",
        )
        .unwrap();

        std::fs::create_dir_all(workspace.path().join("config")).unwrap();
        std::fs::write(
            workspace.path().join("config/config.toml"),
            "[build]\nqueue_latency_ms = 2000\n",
        )
        .unwrap();

        let config = ConfigLoader::load(workspace.path()).unwrap();
        assert_eq!(config.build.queue_latency_ms, 2000);
        assert_eq!(config.http.retries, 7);
        assert_eq!(config.workspace_root.as_deref(), Some(workspace.path()));
    });
}

#[test]
fn test_workspace_without_files_uses_defaults() {
    let xdg = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();

    with_xdg_env(&xdg, || {
        let config = ConfigLoader::load(workspace.path()).unwrap();
        let defaults = FeedbuildConfig::default();
        assert_eq!(config.dirs.output, defaults.dirs.output);
        assert_eq!(config.build.queue_latency_ms, 60_000);
        assert_eq!(config.build.wave_mode, WaveMode::Sequential);
    });
}
