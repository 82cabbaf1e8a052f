//! Integration tests for database initialization

use sift_common::db::init::{ensure_setting, init_database};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sub").join("photosift.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists(), "Database file was not created");

    let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(foreign_keys, 1);
}

#[tokio::test]
async fn test_database_opens_existing_and_keeps_settings() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("photosift.db");

    let pool1 = init_database(&db_path).await.unwrap();
    ensure_setting(&pool1, "coarse_grid_dimension", "20").await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    let value: String =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = 'coarse_grid_dimension'")
            .fetch_one(&pool2)
            .await
            .unwrap();
    assert_eq!(value, "20");
}
