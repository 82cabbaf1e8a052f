//! Vision API key and endpoint resolution
//!
//! Tests that touch SIFT_VISION_API_KEY / SIFT_VISION_ENDPOINT are marked
//! #[serial] so they never run concurrently.

use serial_test::serial;
use sift_common::config::TomlConfig;
use sift_triage::config::{
    is_valid_key, resolve_vision_api_key, resolve_vision_endpoint, VISION_API_KEY_ENV,
    VISION_ENDPOINT_ENV,
};
use sift_triage::db::settings::set_vision_api_key;
use sift_triage::services::vision_client::DEFAULT_VISION_ENDPOINT;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

async fn settings_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sift_common::db::init::create_settings_table(&pool).await.unwrap();
    pool
}

fn toml_with_key(key: Option<&str>) -> TomlConfig {
    TomlConfig {
        vision_api_key: key.map(str::to_string),
        ..TomlConfig::default()
    }
}

#[tokio::test]
#[serial]
async fn test_database_overrides_env_and_toml() {
    let pool = settings_db().await;
    set_vision_api_key(&pool, "db-key".to_string()).await.unwrap();
    std::env::set_var(VISION_API_KEY_ENV, "env-key");

    let key = resolve_vision_api_key(&pool, &toml_with_key(Some("toml-key")))
        .await
        .unwrap();
    assert_eq!(key, "db-key");

    std::env::remove_var(VISION_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_env_fallback_when_database_empty() {
    let pool = settings_db().await;
    std::env::set_var(VISION_API_KEY_ENV, "env-key");

    let key = resolve_vision_api_key(&pool, &toml_with_key(Some("toml-key")))
        .await
        .unwrap();
    assert_eq!(key, "env-key");

    std::env::remove_var(VISION_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_toml_fallback_and_blank_values_ignored() {
    let pool = settings_db().await;
    set_vision_api_key(&pool, "   ".to_string()).await.unwrap();
    std::env::set_var(VISION_API_KEY_ENV, "");

    let key = resolve_vision_api_key(&pool, &toml_with_key(Some("toml-key")))
        .await
        .unwrap();
    assert_eq!(key, "toml-key");

    std::env::remove_var(VISION_API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_missing_key_is_config_error() {
    let pool = settings_db().await;
    std::env::remove_var(VISION_API_KEY_ENV);

    let err = resolve_vision_api_key(&pool, &toml_with_key(None))
        .await
        .unwrap_err();
    assert!(matches!(err, sift_common::Error::Config(_)));
    assert!(err.to_string().contains(VISION_API_KEY_ENV));
}

#[test]
#[serial]
fn test_endpoint_resolution_order() {
    std::env::remove_var(VISION_ENDPOINT_ENV);
    assert_eq!(resolve_vision_endpoint(&TomlConfig::default()), DEFAULT_VISION_ENDPOINT);

    let toml = TomlConfig {
        vision_endpoint: Some("http://toml.local/v1".to_string()),
        ..TomlConfig::default()
    };
    assert_eq!(resolve_vision_endpoint(&toml), "http://toml.local/v1");

    std::env::set_var(VISION_ENDPOINT_ENV, "http://env.local/v1");
    assert_eq!(resolve_vision_endpoint(&toml), "http://env.local/v1");
    std::env::remove_var(VISION_ENDPOINT_ENV);
}

#[test]
fn test_key_validation() {
    assert!(is_valid_key("sk-abc"));
    assert!(!is_valid_key(""));
    assert!(!is_valid_key(" \t\n"));
}
