//! Per-group task cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{KvBackend, TaskCache};
use crate::domain::{GroupSnapshot, Task, TaskStatus};

/// Default key prefix
pub const DEFAULT_PREFIX: &str = "tasks";

/// [`TaskCache`] over any [`KvBackend`], keyed `<prefix>:<order>:<group>`
#[derive(Clone)]
pub struct GroupCache {
    backend: Arc<dyn KvBackend>,
    prefix: String,
    ttl: Duration,
}

impl GroupCache {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(&self, order_id: &str, group_id: &str) -> String {
        format!("{}:{}:{}", self.prefix, order_id, group_id)
    }

    fn order_prefix(&self, order_id: &str) -> String {
        format!("{}:{}:", self.prefix, order_id)
    }

    async fn write(&self, key: &str, snapshot: &GroupSnapshot) {
        let bytes = match serde_json::to_vec(snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.backend.put(key, bytes, self.ttl).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(key, error = %e, "Cache delete failed");
        }
    }
}

#[async_trait]
impl TaskCache for GroupCache {
    async fn get(&self, order_id: &str, group_id: &str) -> Option<GroupSnapshot> {
        let key = self.key(order_id, group_id);

        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(key, error = %e, "Undecodable cache entry, treating as miss");
                None
            }
        }
    }

    async fn set(&self, order_id: &str, group_id: &str, group_name: &str, tasks: &[Task]) {
        let key = self.key(order_id, group_id);
        let snapshot = GroupSnapshot {
            group_name: group_name.to_string(),
            tasks: tasks.to_vec(),
        };
        self.write(&key, &snapshot).await;
    }

    async fn patch_task_status(&self, order_id: &str, group_id: &str, task_id: i64, status: TaskStatus) {
        let Some(mut snapshot) = self.get(order_id, group_id).await else {
            debug!(order_id, group_id, "No cached entry to patch");
            return;
        };

        let Some(task) = snapshot.tasks.iter_mut().find(|t| t.id == task_id) else {
            debug!(order_id, group_id, task_id, "Task not in cached entry");
            return;
        };
        task.status = status;

        self.write(&self.key(order_id, group_id), &snapshot).await;
    }

    async fn invalidate_group(&self, order_id: &str, group_id: &str) {
        self.delete(&self.key(order_id, group_id)).await;
    }

    async fn invalidate_order(&self, order_id: &str) {
        let prefix = self.order_prefix(order_id);
        let keys = match self.backend.keys_with_prefix(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(order_id, error = %e, "Cache scan failed, order entries left to expire");
                return;
            }
        };

        debug!(order_id, count = keys.len(), "Invalidating order cache entries");
        for key in keys {
            self.delete(&key).await;
        }
    }
}
