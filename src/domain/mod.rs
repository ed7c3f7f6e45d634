//! Domain types for the registry.
//!
//! This module contains the core data structures:
//! - Order: groups, tasks, statuses and deadline handling
//! - Events: broker payloads (inbound events, outbound responses)
//! - Error: the registry error taxonomy
//! - Teammates: reference lists and player profiles

pub mod error;
pub mod events;
pub mod order;
pub mod teammates;

// Re-export commonly used types
pub use error::{ErrorKind, RegistryError};
pub use events::{
    GroupPayload, OrderTasksRequest, OrderTasksResponse, OrdersTasksEvent, TaskPayload,
    TaskStatusUpdate, UpdateTasksEvent,
};
pub use order::{
    parse_deadline, parse_task_id, parse_uuid, Group, GroupSnapshot, GroupTasks,
    OrderTaskRecord, Task, TaskStatus,
};
pub use teammates::{NewPlayer, PlayerProfile, ReferenceCategory, ReferenceItem, TeammateFilter};
