//! Configuration resolution and file loading
//!
//! Tests that manipulate SFR_CONFIG are marked with #[serial] so they do not
//! race each other on the process environment.

use serial_test::serial;
use sfr_common::config::{resolve_config_path, EngineConfig, CONFIG_ENV_VAR};
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
#[serial]
fn test_cli_argument_beats_environment() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/sfr-env-config.toml");

    let cli = PathBuf::from("/tmp/sfr-cli-config.toml");
    assert_eq!(resolve_config_path(Some(&cli)), Some(cli.clone()));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_variable_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/sfr-env-config.toml");

    assert_eq!(
        resolve_config_path(None),
        Some(PathBuf::from("/tmp/sfr-env-config.toml"))
    );

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = EngineConfig::load(Some(&missing)).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
#[serial]
fn test_file_from_environment_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
        request_timeout_ms = 2500

        [feed]
        page_size = 10

        [categories]
        top_n = 5
        cafe_allow_list = ["starbucks"]

        [logging]
        level = "debug"
        "#,
    );
    env::set_var(CONFIG_ENV_VAR, &path);

    let config = EngineConfig::load(None).unwrap();
    assert_eq!(config.request_timeout_ms, 2500);
    assert_eq!(config.feed.page_size, 10);
    assert_eq!(config.feed.aggregate_page_size, 100);
    assert_eq!(config.categories.top_n, 5);
    assert_eq!(config.categories.cafe_allow_list, vec!["starbucks".to_string()]);
    assert_eq!(config.logging.level, "debug");

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[feed]\npage_size = \"five\"\n");

    let err = EngineConfig::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}
