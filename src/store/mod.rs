//! Durable storage of orders, groups and tasks.
//!
//! The [`TaskStore`] trait is the contract the orchestration service consumes.
//! Every operation is scoped by order id. "Not found" is reported
//! structurally (`false`, `None`, empty lists); errors are reserved for
//! malformed input and storage failures.

pub mod query;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Group, GroupSnapshot, GroupTasks, NewPlayer, OrderTaskRecord, OrdersTasksEvent,
    PlayerProfile, ReferenceCategory, ReferenceItem, RegistryError, TaskStatus, TeammateFilter,
    UpdateTasksEvent,
};

pub use query::PlayerQuery;
pub use sqlite::SqliteStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid {field}: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("Invalid task status: {0:?}")]
    InvalidStatus(String),

    #[error("Invalid deadline: {0:?}")]
    InvalidDeadline(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Storage connection poisoned")]
    Poisoned,
}

impl From<RegistryError> for StoreError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidIdentifier { field, value } => {
                Self::InvalidIdentifier { field, value }
            }
            RegistryError::InvalidStatus(s) => Self::InvalidStatus(s),
            RegistryError::InvalidDeadline(s) => Self::InvalidDeadline(s),
            // Other variants never come out of payload parsing
            other => Self::InvalidIdentifier {
                field: "payload",
                value: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidIdentifier { field, value } => {
                Self::InvalidIdentifier { field, value }
            }
            StoreError::InvalidStatus(s) => Self::InvalidStatus(s),
            StoreError::InvalidDeadline(s) => Self::InvalidDeadline(s),
            StoreError::Database(e) => Self::Transport(e.to_string()),
            StoreError::Worker(e) => Self::Unknown(e.to_string()),
            StoreError::Poisoned => Self::Unknown(StoreError::Poisoned.to_string()),
        }
    }
}

/// Order/group/task persistence contract
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Groups of an order, ordered by name
    async fn list_groups(&self, order_id: Uuid) -> StoreResult<Vec<Group>>;

    /// Tasks and group name for one group; empty snapshot if the group is unknown
    async fn list_group_tasks(&self, order_id: Uuid, group_id: Uuid) -> StoreResult<GroupSnapshot>;

    /// Set one task's status; returns whether a row was affected
    async fn update_task_status(
        &self,
        order_id: Uuid,
        task_id: i64,
        status: TaskStatus,
    ) -> StoreResult<bool>;

    /// Owning group of a task
    async fn task_group_id(&self, order_id: Uuid, task_id: i64) -> StoreResult<Option<Uuid>>;

    /// Every task of an order in response-ready form
    async fn order_tasks_for_response(&self, order_id: Uuid) -> StoreResult<Vec<OrderTaskRecord>>;

    /// Apply a bulk upsert; returns the resulting task set of every touched group
    async fn upsert_order_tasks(&self, event: &OrdersTasksEvent) -> StoreResult<Vec<GroupTasks>>;

    /// Apply a status batch atomically; returns how many tasks changed
    async fn apply_task_updates(&self, event: &UpdateTasksEvent) -> StoreResult<usize>;
}

/// Reference lists and player search
#[async_trait]
pub trait TeammateStore: Send + Sync {
    async fn list_reference(&self, category: ReferenceCategory) -> StoreResult<Vec<ReferenceItem>>;

    /// Insert a reference name (no-op if present); returns its id
    async fn insert_reference(&self, category: ReferenceCategory, name: &str) -> StoreResult<i64>;

    async fn upsert_player(&self, player: &NewPlayer) -> StoreResult<()>;

    async fn search_players(&self, filter: &TeammateFilter) -> StoreResult<Vec<PlayerProfile>>;
}
