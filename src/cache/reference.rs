//! Named reference-list cache (games, genres, languages, apps).
//!
//! Each category is one flat key, `<category>:all`, holding a JSON object
//! that wraps the list under the category name:
//! `{"games": [{"id": 1, "name": "Dota 2"}]}`.
//!
//! Concurrent cold misses may all hit the store and repopulate the same key.
//! The lists are small and idempotent, so the last writer simply wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::KvBackend;
use crate::domain::{ReferenceCategory, ReferenceItem};

#[derive(Clone)]
pub struct ReferenceCache {
    backend: Arc<dyn KvBackend>,
    ttl: Duration,
}

impl ReferenceCache {
    pub fn new(backend: Arc<dyn KvBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    fn key(category: ReferenceCategory) -> String {
        format!("{}:all", category.as_str())
    }

    pub async fn get(&self, category: ReferenceCategory) -> Option<Vec<ReferenceItem>> {
        let key = Self::key(category);

        let bytes = match self.backend.get(&key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(key, error = %e, "Reference cache read failed");
                return None;
            }
        };

        let mut wrapped: HashMap<String, Vec<ReferenceItem>> = match serde_json::from_slice(&bytes) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                warn!(key, error = %e, "Undecodable reference entry");
                return None;
            }
        };
        wrapped.remove(category.as_str())
    }

    pub async fn set(&self, category: ReferenceCategory, items: &[ReferenceItem]) {
        let key = Self::key(category);
        let wrapped = HashMap::from([(category.as_str(), items)]);

        let bytes = match serde_json::to_vec(&wrapped) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode reference entry");
                return;
            }
        };

        if let Err(e) = self.backend.put(&key, bytes, self.ttl).await {
            warn!(key, error = %e, "Reference cache write failed");
        }
    }

    /// Read-through: return the cached list or load, store and return it
    pub async fn get_or_load<F, Fut, E>(
        &self,
        category: ReferenceCategory,
        loader: F,
    ) -> Result<Vec<ReferenceItem>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ReferenceItem>, E>>,
    {
        if let Some(items) = self.get(category).await {
            return Ok(items);
        }

        debug!(%category, "Reference cache miss");
        let items = loader().await?;
        self.set(category, &items).await;
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKv;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn games() -> Vec<ReferenceItem> {
        vec![
            ReferenceItem {
                id: 1,
                name: "Dota 2".into(),
            },
            ReferenceItem {
                id: 2,
                name: "Factorio".into(),
            },
        ]
    }

    #[tokio::test]
    async fn test_entry_is_wrapped_under_category() {
        let kv = Arc::new(MemoryKv::new());
        let cache = ReferenceCache::new(kv.clone(), Duration::from_secs(60));

        cache.set(ReferenceCategory::Games, &games()).await;

        let raw = kv.get("games:all").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["games"][1]["name"], "Factorio");
    }

    #[tokio::test]
    async fn test_get_or_load_reads_through_once() {
        let cache = ReferenceCache::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let items = cache
                .get_or_load(ReferenceCategory::Games, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(games())
                })
                .await
                .unwrap();
            assert_eq!(items, games());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let cache = ReferenceCache::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));

        let result = cache
            .get_or_load(ReferenceCategory::Apps, || async {
                Err::<Vec<ReferenceItem>, _>("store down")
            })
            .await;
        assert!(result.is_err());
        assert!(cache.get(ReferenceCategory::Apps).await.is_none());
    }

    #[tokio::test]
    async fn test_categories_do_not_collide() {
        let cache = ReferenceCache::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));
        cache.set(ReferenceCategory::Games, &games()).await;

        assert!(cache.get(ReferenceCategory::Genres).await.is_none());
    }
}
