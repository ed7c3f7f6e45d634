//! TTL-bounded projections over a key-value backend.
//!
//! Two caches share one backend abstraction:
//! - [`GroupCache`]: `{group_name, tasks}` per (order, group), implementing [`TaskCache`]
//! - [`ReferenceCache`]: flat reference lists keyed by category
//!
//! Cache failures are logged and swallowed here; callers only ever see a
//! miss or a no-op.

pub mod memory;
#[cfg(feature = "nats")]
pub mod nats_kv;
pub mod reference;
pub mod tasks;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{GroupSnapshot, Task, TaskStatus};

pub use memory::MemoryKv;
#[cfg(feature = "nats")]
pub use nats_kv::NatsKv;
pub use reference::ReferenceCache;
pub use tasks::GroupCache;

/// Errors raised by cache backends
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache entry codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Minimal key-value surface the caches need
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value; it must stop being visible after `ttl`
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Live keys starting with `prefix`
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

/// Per-group task projection used by the orchestration service.
///
/// Identifiers are taken as strings: entries are keyed by whatever the
/// service resolved, and inbound batches may carry ids the store rejects.
#[async_trait]
pub trait TaskCache: Send + Sync {
    /// Cached snapshot; misses, expiry and backend errors all read as `None`
    async fn get(&self, order_id: &str, group_id: &str) -> Option<GroupSnapshot>;

    /// Overwrite with a fresh TTL
    async fn set(&self, order_id: &str, group_id: &str, group_name: &str, tasks: &[Task]);

    /// Replace one task's status in place; no-op if entry or task is absent
    async fn patch_task_status(&self, order_id: &str, group_id: &str, task_id: i64, status: TaskStatus);

    async fn invalidate_group(&self, order_id: &str, group_id: &str);

    /// Drop every entry belonging to the order
    async fn invalidate_order(&self, order_id: &str);
}
