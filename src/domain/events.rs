//! Broker payloads.
//!
//! Inbound events carry identifiers and statuses as raw strings; they are
//! validated by the service before anything is written.

use serde::{Deserialize, Serialize};

use super::order::OrderTaskRecord;

/// Bulk create/update of an order's groups and tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdersTasksEvent {
    pub order_id: String,
    #[serde(default)]
    pub groups: Vec<GroupPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPayload {
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub tasks: Vec<TaskPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub id: i64,
    pub status: String,
    /// `DD.MM.YYYY` or empty
    #[serde(default)]
    pub deadline: String,
}

/// Pull-style query for an order's full task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTasksRequest {
    pub request_id: String,
    pub order_id: String,
}

/// Batch of status changes for one order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTasksEvent {
    pub order_id: String,
    #[serde(default)]
    pub updates: Vec<TaskStatusUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusUpdate {
    pub task_id: i64,
    pub status: String,
}

/// Reply to an [`OrderTasksRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTasksResponse {
    pub request_id: String,
    pub order_id: String,
    pub tasks: Vec<OrderTaskRecord>,
}

impl OrderTasksResponse {
    /// Empty response echoing the request identifiers
    pub fn for_request(request: &OrderTasksRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            order_id: request.order_id.clone(),
            tasks: Vec::new(),
        }
    }
}
