//! Unit tests for configuration and graceful degradation
//!
//! Covers root folder priority order (CLI → ENV → TOML → default), root folder
//! initialization and TOML schema compatibility.
//!
//! Note: Uses serial_test to prevent ENV variable race conditions. Tests that
//! manipulate SIFT_ROOT_FOLDER or SIFT_ROOT are marked with #[serial].

use serial_test::serial;
use sift_common::config::{
    CompiledDefaults, LoggingConfig, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.root_folder.to_string_lossy().contains("photosift"));
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var("SIFT_ROOT_FOLDER");
    env::remove_var("SIFT_ROOT");

    let resolver = RootFolderResolver::new("nonexistent-test-module-12345");
    let root_folder = resolver.resolve();

    assert_eq!(root_folder, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_env_var_root_folder() {
    let test_path = "/tmp/sift-test-env-folder";
    env::set_var("SIFT_ROOT_FOLDER", test_path);

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, PathBuf::from(test_path));

    env::remove_var("SIFT_ROOT_FOLDER");
}

#[test]
#[serial]
fn test_resolver_root_folder_takes_precedence_over_alias() {
    env::remove_var("SIFT_ROOT_FOLDER");
    env::remove_var("SIFT_ROOT");

    env::set_var("SIFT_ROOT_FOLDER", "/tmp/sift-priority-1");
    env::set_var("SIFT_ROOT", "/tmp/sift-priority-2");

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/sift-priority-1"));

    env::remove_var("SIFT_ROOT_FOLDER");
    env::remove_var("SIFT_ROOT");
}

#[test]
#[serial]
fn test_cli_arg_beats_environment() {
    env::set_var("SIFT_ROOT_FOLDER", "/tmp/sift-from-env");

    let resolver = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/sift-from-cli")));
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/sift-from-cli"));

    env::remove_var("SIFT_ROOT_FOLDER");
}

#[test]
fn test_module_name_in_config_path() {
    let resolver = RootFolderResolver::new("sift-triage");
    if let Some(path) = resolver.config_file_path() {
        assert!(path.ends_with("photosift/sift-triage.toml"));
    }
}

#[test]
fn test_initializer_paths_and_idempotent_creation() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("level1").join("level2");

    let initializer = RootFolderInitializer::new(root.clone());
    assert!(!initializer.database_exists());

    initializer.ensure_directory_exists().unwrap();
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join("photosift.db"));
    assert_eq!(initializer.jobs_path(), root.join("jobs"));
}

#[test]
fn test_toml_roundtrip_with_vision_settings() {
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/photos")),
        logging: LoggingConfig::default(),
        vision_api_key: Some("test-key-123".to_string()),
        vision_endpoint: Some("https://api.example.com/v1".to_string()),
    };

    let toml_str = toml::to_string(&config).unwrap();
    let parsed: TomlConfig = toml::from_str(&toml_str).unwrap();

    assert_eq!(parsed, config);
}

#[test]
fn test_backward_compatible_missing_fields() {
    let toml_str = r#"
        root_folder = "/photos"
        [logging]
        level = "debug"
    "#;

    let config: TomlConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.vision_api_key, None);
    assert_eq!(config.vision_endpoint, None);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.root_folder, Some(PathBuf::from("/photos")));
}
