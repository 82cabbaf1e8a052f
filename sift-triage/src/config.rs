//! Configuration resolution for sift-triage
//!
//! Vision API key: Database → ENV → TOML. Endpoint: ENV → TOML → default.

use sift_common::config::TomlConfig;
use sift_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::services::vision_client::DEFAULT_VISION_ENDPOINT;

/// Environment variable holding the vision API key
pub const VISION_API_KEY_ENV: &str = "SIFT_VISION_API_KEY";

/// Environment variable overriding the vision endpoint
pub const VISION_ENDPOINT_ENV: &str = "SIFT_VISION_ENDPOINT";

/// Resolve the vision API key
///
/// **Priority:** Database → ENV → TOML. A key found in more than one place
/// is logged as a warning since only the first one is used.
pub async fn resolve_vision_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<String> {
    let db_key = crate::db::settings::get_vision_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(VISION_API_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .vision_api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        ("database", db_key.is_some()),
        ("environment", env_key.is_some()),
        ("TOML", toml_key.is_some()),
    ]
    .iter()
    .filter(|(_, present)| *present)
    .map(|(name, _)| *name)
    .collect();

    if sources.len() > 1 {
        warn!(
            "Vision API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("Vision API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("Vision API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("Vision API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Vision API key not configured. Please configure using one of:\n\
         1. Environment: {}=your-key-here\n\
         2. TOML config: ~/.config/photosift/sift-triage.toml (vision_api_key = \"your-key\")\n\
         3. Database: settings table, key 'vision_api_key'",
        VISION_API_KEY_ENV
    )))
}

/// Resolve the vision endpoint base URL (ENV → TOML → default)
pub fn resolve_vision_endpoint(toml_config: &TomlConfig) -> String {
    std::env::var(VISION_ENDPOINT_ENV)
        .ok()
        .filter(|e| is_valid_key(e))
        .or_else(|| toml_config.vision_endpoint.clone().filter(|e| is_valid_key(e)))
        .unwrap_or_else(|| DEFAULT_VISION_ENDPOINT.to_string())
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
