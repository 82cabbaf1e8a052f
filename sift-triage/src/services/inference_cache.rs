//! Inference cache
//!
//! Memoizes raw model responses per `(image_id, model_name, model_version)`.
//! For grid calls the image id is the grid identity (hash of composite bytes
//! and prompt); for scoring calls it is the photo's content hash.
//! Writes never overwrite: the first stored response wins.

use async_trait::async_trait;
use sift_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::vision_client::ModelSpec;
use crate::db;

/// Result of a cache write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// A response was already cached; nothing changed
    AlreadyPresent,
}

#[async_trait]
pub trait InferenceCache: Send + Sync {
    async fn get(&self, image_id: &str, model: &ModelSpec) -> Result<Option<String>>;

    async fn put(&self, image_id: &str, model: &ModelSpec, response: &str) -> Result<PutOutcome>;

    /// Drop every entry; returns entries removed
    async fn clear_all(&self) -> Result<u64>;

    /// Drop every entry for one image id; returns entries removed
    async fn invalidate_image(&self, image_id: &str) -> Result<u64>;
}

/// Cache backed by the `inference_cache` table
#[derive(Clone)]
pub struct SqliteInferenceCache {
    db: SqlitePool,
}

impl SqliteInferenceCache {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InferenceCache for SqliteInferenceCache {
    async fn get(&self, image_id: &str, model: &ModelSpec) -> Result<Option<String>> {
        db::cache::get(&self.db, image_id, &model.name, &model.version).await
    }

    async fn put(&self, image_id: &str, model: &ModelSpec, response: &str) -> Result<PutOutcome> {
        let inserted =
            db::cache::put(&self.db, image_id, &model.name, &model.version, response).await?;
        Ok(if inserted {
            PutOutcome::Inserted
        } else {
            PutOutcome::AlreadyPresent
        })
    }

    async fn clear_all(&self) -> Result<u64> {
        db::cache::clear_all(&self.db).await
    }

    async fn invalidate_image(&self, image_id: &str) -> Result<u64> {
        db::cache::invalidate_image(&self.db, image_id).await
    }
}

type CacheKey = (String, String, String);

/// In-process cache for tests and embedding
#[derive(Default)]
pub struct MemoryInferenceCache {
    entries: RwLock<HashMap<CacheKey, String>>,
}

impl MemoryInferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn key(image_id: &str, model: &ModelSpec) -> CacheKey {
        (image_id.to_string(), model.name.clone(), model.version.clone())
    }
}

#[async_trait]
impl InferenceCache for MemoryInferenceCache {
    async fn get(&self, image_id: &str, model: &ModelSpec) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(&Self::key(image_id, model)).cloned())
    }

    async fn put(&self, image_id: &str, model: &ModelSpec, response: &str) -> Result<PutOutcome> {
        let mut entries = self.entries.write().await;
        let key = Self::key(image_id, model);
        if entries.contains_key(&key) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        entries.insert(key, response.to_string());
        Ok(PutOutcome::Inserted)
    }

    async fn clear_all(&self) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn invalidate_image(&self, image_id: &str) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|(id, _, _), _| id != image_id);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_first_write_wins() {
        let cache = MemoryInferenceCache::new();
        let model = ModelSpec::new("m", "1");

        assert_eq!(cache.put("img", &model, "A1").await.unwrap(), PutOutcome::Inserted);
        assert_eq!(
            cache.put("img", &model, "B2").await.unwrap(),
            PutOutcome::AlreadyPresent
        );
        assert_eq!(cache.get("img", &model).await.unwrap().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_memory_cache_invalidation() {
        let cache = MemoryInferenceCache::new();
        let m1 = ModelSpec::new("m", "1");
        let m2 = ModelSpec::new("m", "2");
        cache.put("a", &m1, "x").await.unwrap();
        cache.put("a", &m2, "y").await.unwrap();
        cache.put("b", &m1, "z").await.unwrap();

        assert_eq!(cache.invalidate_image("a").await.unwrap(), 2);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.clear_all().await.unwrap(), 1);
        assert!(cache.is_empty().await);
    }
}
