//! Tests for configuration loading and stations root resolution
//!
//! Tests that manipulate ARCHIVE_STATIONS_ROOT are marked with #[serial]
//! so they never run in parallel with each other.

use archive_common::config::{
    default_stations_root, load_toml_config, RootSource, StationsRootResolver, TomlConfig,
    STATIONS_ROOT_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_cli_argument_wins_over_everything() {
    env::set_var(STATIONS_ROOT_ENV, "/from/env");
    let toml = TomlConfig {
        stations_root: Some(PathBuf::from("/from/toml")),
        ..TomlConfig::default()
    };

    let (root, source) = StationsRootResolver::new(Some(Path::new("/from/cli")), &toml).resolve();
    assert_eq!(root, PathBuf::from("/from/cli"));
    assert_eq!(source, RootSource::CommandLine);

    env::remove_var(STATIONS_ROOT_ENV);
}

#[test]
#[serial]
fn test_environment_wins_over_toml() {
    env::set_var(STATIONS_ROOT_ENV, "/from/env");
    let toml = TomlConfig {
        stations_root: Some(PathBuf::from("/from/toml")),
        ..TomlConfig::default()
    };

    let (root, source) = StationsRootResolver::new(None, &toml).resolve();
    assert_eq!(root, PathBuf::from("/from/env"));
    assert_eq!(source, RootSource::Environment);

    env::remove_var(STATIONS_ROOT_ENV);
}

#[test]
#[serial]
fn test_toml_used_when_no_overrides() {
    env::remove_var(STATIONS_ROOT_ENV);
    let toml = TomlConfig {
        stations_root: Some(PathBuf::from("/from/toml")),
        ..TomlConfig::default()
    };

    let (root, source) = StationsRootResolver::new(None, &toml).resolve();
    assert_eq!(root, PathBuf::from("/from/toml"));
    assert_eq!(source, RootSource::ConfigFile);
}

#[test]
#[serial]
fn test_compiled_default_as_last_resort() {
    env::remove_var(STATIONS_ROOT_ENV);
    let toml = TomlConfig::default();

    let (root, source) = StationsRootResolver::new(None, &toml).resolve();
    assert_eq!(root, default_stations_root());
    assert_eq!(source, RootSource::CompiledDefault);
}

#[test]
#[serial]
fn test_blank_environment_value_is_ignored() {
    env::set_var(STATIONS_ROOT_ENV, "   ");
    let toml = TomlConfig::default();

    let (_, source) = StationsRootResolver::new(None, &toml).resolve();
    assert_eq!(source, RootSource::CompiledDefault);

    env::remove_var(STATIONS_ROOT_ENV);
}

#[test]
fn test_load_explicit_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
stations_root = "/srv/stations"
port = 5800

[logging]
level = "debug"

[traversal]
max_depth = 8
"#,
    )
    .unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.stations_root, Some(PathBuf::from("/srv/stations")));
    assert_eq!(config.port, 5800);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.traversal.max_depth, 8);
    assert_eq!(config.traversal.max_nodes, 10_000);
}

#[test]
fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_toml_config(Some(&dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_malformed_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();
    assert!(load_toml_config(Some(&path)).is_err());
}
