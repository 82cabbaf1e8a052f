//! Settings database operations
//!
//! Triage tunables live in the shared key-value `settings` table. Missing or
//! NULL keys fall back to the compiled defaults in [`TriageSettings`].

use sift_common::{Error, Result};
use sqlx::{Pool, Sqlite};

use crate::services::composite_scorer::ScorerConfig;
use crate::services::vision_client::ModelSpec;

const VISION_API_KEY: &str = "vision_api_key";
const SCORER_CONFIG: &str = "scorer_config";

/// Get vision API key from database
pub async fn get_vision_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, VISION_API_KEY).await
}

/// Set vision API key in database
pub async fn set_vision_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, VISION_API_KEY, key).await
}

/// Scorer configuration, `None` when not configured
pub async fn get_scorer_config(db: &Pool<Sqlite>) -> Result<Option<ScorerConfig>> {
    match get_setting::<String>(db, SCORER_CONFIG).await? {
        Some(json) if !json.trim().is_empty() => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid scorer_config: {}", e))),
        _ => Ok(None),
    }
}

pub async fn set_scorer_config(db: &Pool<Sqlite>, config: &ScorerConfig) -> Result<()> {
    let json = serde_json::to_string(config)
        .map_err(|e| Error::Internal(format!("Failed to serialize scorer_config: {}", e)))?;
    set_setting(db, SCORER_CONFIG, json).await
}

/// Default value of every triage tunable, as stored strings
pub fn default_settings() -> Vec<(&'static str, String)> {
    let defaults = TriageSettings::default();
    let models = defaults
        .triage_models
        .iter()
        .map(ModelSpec::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let scorer = serde_json::to_string(&ScorerConfig::default()).unwrap_or_default();

    vec![
        ("coarse_grid_dimension", defaults.coarse_grid_dimension.to_string()),
        ("fine_grid_dimension", defaults.fine_grid_dimension.to_string()),
        ("coarse_cell_px", defaults.coarse_cell_px.to_string()),
        ("fine_cell_px", defaults.fine_cell_px.to_string()),
        ("grid_parallelism", defaults.grid_parallelism.to_string()),
        ("model_call_timeout_secs", defaults.model_call_timeout_secs.to_string()),
        ("grid_failure_threshold", defaults.grid_failure_threshold.to_string()),
        ("job_ttl_hours", defaults.job_ttl_hours.to_string()),
        ("credits_per_call", defaults.credits_per_call.to_string()),
        ("triage_models", models),
        ("jpeg_quality", defaults.jpeg_quality.to_string()),
        ("database_max_lock_wait_ms", defaults.database_max_lock_wait_ms.to_string()),
        (SCORER_CONFIG, scorer),
    ]
}

/// Insert defaults for any setting not yet present
pub async fn seed_default_settings(db: &Pool<Sqlite>) -> Result<()> {
    for (key, value) in default_settings() {
        sift_common::db::ensure_setting(db, key, &value).await?;
    }
    Ok(())
}

/// Triage tunables
#[derive(Debug, Clone, PartialEq)]
pub struct TriageSettings {
    pub coarse_grid_dimension: u32,
    pub fine_grid_dimension: u32,
    pub coarse_cell_px: u32,
    pub fine_cell_px: u32,
    /// Grids processed concurrently within a pass
    pub grid_parallelism: usize,
    pub model_call_timeout_secs: u64,
    /// Failed-grid fraction above which a pass fails
    pub grid_failure_threshold: f64,
    pub job_ttl_hours: i64,
    pub credits_per_call: f64,
    pub triage_models: Vec<ModelSpec>,
    pub jpeg_quality: u8,
    pub database_max_lock_wait_ms: u64,
    pub scorer_config: Option<ScorerConfig>,
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            coarse_grid_dimension: 20,
            fine_grid_dimension: 4,
            coarse_cell_px: 96,
            fine_cell_px: 384,
            grid_parallelism: 4,
            model_call_timeout_secs: 120,
            grid_failure_threshold: 0.5,
            job_ttl_hours: 168,
            credits_per_call: 1.0,
            triage_models: vec![
                ModelSpec::new("gpt-4o", "2024-08-06"),
                ModelSpec::new("gpt-4o-mini", "2024-07-18"),
            ],
            jpeg_quality: crate::grid::DEFAULT_JPEG_QUALITY,
            database_max_lock_wait_ms: 5000,
            scorer_config: None,
        }
    }
}

impl TriageSettings {
    /// Load from the settings table, falling back to defaults per key
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let d = Self::default();

        let triage_models = match get_setting::<String>(db, "triage_models").await? {
            Some(list) => ModelSpec::parse_list(&list).map_err(Error::Config)?,
            None => d.triage_models,
        };

        let settings = Self {
            coarse_grid_dimension: get_setting(db, "coarse_grid_dimension")
                .await?
                .unwrap_or(d.coarse_grid_dimension),
            fine_grid_dimension: get_setting(db, "fine_grid_dimension")
                .await?
                .unwrap_or(d.fine_grid_dimension),
            coarse_cell_px: get_setting(db, "coarse_cell_px").await?.unwrap_or(d.coarse_cell_px),
            fine_cell_px: get_setting(db, "fine_cell_px").await?.unwrap_or(d.fine_cell_px),
            grid_parallelism: get_setting(db, "grid_parallelism")
                .await?
                .unwrap_or(d.grid_parallelism),
            model_call_timeout_secs: get_setting(db, "model_call_timeout_secs")
                .await?
                .unwrap_or(d.model_call_timeout_secs),
            grid_failure_threshold: get_setting(db, "grid_failure_threshold")
                .await?
                .unwrap_or(d.grid_failure_threshold),
            job_ttl_hours: get_setting(db, "job_ttl_hours").await?.unwrap_or(d.job_ttl_hours),
            credits_per_call: get_setting(db, "credits_per_call")
                .await?
                .unwrap_or(d.credits_per_call),
            triage_models,
            jpeg_quality: get_setting(db, "jpeg_quality").await?.unwrap_or(d.jpeg_quality),
            database_max_lock_wait_ms: get_setting(db, "database_max_lock_wait_ms")
                .await?
                .unwrap_or(d.database_max_lock_wait_ms),
            scorer_config: get_scorer_config(db).await?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("coarse_grid_dimension", self.coarse_grid_dimension as u64),
            ("fine_grid_dimension", self.fine_grid_dimension as u64),
            ("coarse_cell_px", self.coarse_cell_px as u64),
            ("fine_cell_px", self.fine_cell_px as u64),
            ("grid_parallelism", self.grid_parallelism as u64),
            ("model_call_timeout_secs", self.model_call_timeout_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", key)));
            }
        }

        // Two-letter row labels stop at ZZ
        if self.coarse_grid_dimension > 99 || self.fine_grid_dimension > 99 {
            return Err(Error::Config(
                "Grid dimension must not exceed 99 (two-digit columns)".to_string(),
            ));
        }
        let passes = [
            ("coarse", self.coarse_grid_dimension, self.coarse_cell_px),
            ("fine", self.fine_grid_dimension, self.fine_cell_px),
        ];
        for (pass, dimension, cell_px) in passes {
            if crate::grid::grid_side(dimension, cell_px).is_none() {
                return Err(Error::Config(format!(
                    "{} grid of {}x{} cells at {} px exceeds {} px per side",
                    pass,
                    dimension,
                    dimension,
                    cell_px,
                    crate::grid::MAX_GRID_SIDE_PX
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.grid_failure_threshold) {
            return Err(Error::Config(format!(
                "grid_failure_threshold must be within 0.0..=1.0 (got {})",
                self.grid_failure_threshold
            )));
        }
        if self.credits_per_call < 0.0 {
            return Err(Error::Config("credits_per_call must not be negative".to_string()));
        }
        if self.triage_models.is_empty() {
            return Err(Error::Config("triage_models must name at least one model".to_string()));
        }
        Ok(())
    }

    pub fn job_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.job_ttl_hours)
    }

    pub fn model_call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.model_call_timeout_secs)
    }
}

/// Generic setting getter
///
/// NULL values read as unset.
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row.and_then(|(value,)| value) {
        Some(value) => {
            let parsed = value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sift_common::db::create_settings_table(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_api_key_roundtrip() {
        let db = setup_test_db().await;
        assert_eq!(get_vision_api_key(&db).await.unwrap(), None);

        set_vision_api_key(&db, "sk-test-key".to_string()).await.unwrap();
        assert_eq!(get_vision_api_key(&db).await.unwrap(), Some("sk-test-key".to_string()));

        set_vision_api_key(&db, "sk-other".to_string()).await.unwrap();
        assert_eq!(get_vision_api_key(&db).await.unwrap(), Some("sk-other".to_string()));
    }

    #[tokio::test]
    async fn test_load_defaults_from_empty_table() {
        let db = setup_test_db().await;
        let settings = TriageSettings::load(&db).await.unwrap();
        assert_eq!(settings, TriageSettings::default());
    }

    #[tokio::test]
    async fn test_seeded_defaults_load_back() {
        let db = setup_test_db().await;
        seed_default_settings(&db).await.unwrap();

        let settings = TriageSettings::load(&db).await.unwrap();
        assert_eq!(settings.coarse_grid_dimension, 20);
        assert_eq!(settings.triage_models.len(), 2);
        assert_eq!(settings.scorer_config, Some(ScorerConfig::default()));
    }

    #[tokio::test]
    async fn test_overrides_are_applied() {
        let db = setup_test_db().await;
        set_setting(&db, "grid_parallelism", 1).await.unwrap();
        set_setting(&db, "triage_models", "llava@1.6").await.unwrap();

        let settings = TriageSettings::load(&db).await.unwrap();
        assert_eq!(settings.grid_parallelism, 1);
        assert_eq!(settings.triage_models, vec![ModelSpec::new("llava", "1.6")]);
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        let db = setup_test_db().await;
        set_setting(&db, "grid_failure_threshold", 1.5).await.unwrap();
        assert!(matches!(TriageSettings::load(&db).await, Err(Error::Config(_))));

        set_setting(&db, "grid_failure_threshold", "abc").await.unwrap();
        assert!(matches!(TriageSettings::load(&db).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_oversized_cells_rejected() {
        let db = setup_test_db().await;
        set_setting(&db, "fine_cell_px", 4_000_000_000u32).await.unwrap();
        assert!(matches!(TriageSettings::load(&db).await, Err(Error::Config(_))));

        set_setting(&db, "fine_cell_px", 384).await.unwrap();
        set_setting(&db, "coarse_cell_px", 1000).await.unwrap();
        assert!(matches!(TriageSettings::load(&db).await, Err(Error::Config(_))));
    }
}
