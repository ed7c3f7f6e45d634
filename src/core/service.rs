//! Orchestration service: validation, cache-aside reads and cache upkeep.
//!
//! The store is the source of truth. The cache is only ever:
//! - filled after a store read (`list_group_tasks`)
//! - patched for a single status change (`update_task_status`)
//! - rewritten or dropped per group after a bulk upsert
//! - dropped for a whole order after a status batch

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cache::TaskCache;
use crate::domain::{
    parse_deadline, parse_task_id, parse_uuid, Group, GroupSnapshot, OrderTasksRequest,
    OrderTasksResponse, OrdersTasksEvent, RegistryError, TaskStatus, UpdateTasksEvent,
};
use crate::ingest::EventHandler;
use crate::store::TaskStore;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, RegistryError>;

/// Cache key component for an identifier taken from a payload.
///
/// Valid UUIDs are keyed in canonical form so entries written from events
/// match entries written by reads; anything else is keyed verbatim.
fn cache_id(raw: &str) -> String {
    Uuid::parse_str(raw.trim())
        .map(|id| id.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

#[derive(Clone)]
pub struct RegistryService {
    store: Arc<dyn TaskStore>,
    cache: Arc<dyn TaskCache>,
}

impl RegistryService {
    pub fn new(store: Arc<dyn TaskStore>, cache: Arc<dyn TaskCache>) -> Self {
        Self { store, cache }
    }

    /// Groups of an order (not cached)
    #[instrument(skip(self))]
    pub async fn list_groups(&self, order_id: &str) -> ServiceResult<Vec<Group>> {
        let order = parse_uuid("order_id", order_id)?;
        Ok(self.store.list_groups(order).await?)
    }

    /// Tasks of one group, served from the cache when possible
    #[instrument(skip(self))]
    pub async fn list_group_tasks(&self, order_id: &str, group_id: &str) -> ServiceResult<GroupSnapshot> {
        let order = parse_uuid("order_id", order_id)?;
        let group = parse_uuid("group_id", group_id)?;
        let (order_key, group_key) = (order.to_string(), group.to_string());

        if let Some(snapshot) = self.cache.get(&order_key, &group_key).await {
            debug!("Cache hit");
            return Ok(snapshot);
        }

        let snapshot = self.store.list_group_tasks(order, group).await?;
        self.cache
            .set(&order_key, &group_key, &snapshot.group_name, &snapshot.tasks)
            .await;

        Ok(snapshot)
    }

    /// Change one task's status and patch its cached group entry
    #[instrument(skip(self))]
    pub async fn update_task_status(&self, order_id: &str, task_id: &str, status: &str) -> ServiceResult<()> {
        // Status first: a bad status must never reach the store
        let status: TaskStatus = status.parse()?;
        let order = parse_uuid("order_id", order_id)?;
        let task = parse_task_id(task_id)?;

        if !self.store.update_task_status(order, task, status).await? {
            return Err(RegistryError::TaskNotFound {
                order_id: order.to_string(),
                task_id: task,
            });
        }

        match self.store.task_group_id(order, task).await {
            Ok(Some(group)) => {
                self.cache
                    .patch_task_status(&order.to_string(), &group.to_string(), task, status)
                    .await;
            }
            Ok(None) => warn!(task, "Updated task has no group, cache not patched"),
            Err(e) => warn!(task, error = %e, "Group lookup failed, cache not patched"),
        }

        Ok(())
    }

    /// Apply a bulk upsert, then rewrite or drop each touched group's entry
    #[instrument(skip(self, event), fields(order_id = %event.order_id, groups = event.groups.len()))]
    pub async fn handle_orders_tasks_upsert(&self, event: &OrdersTasksEvent) -> ServiceResult<()> {
        // All-or-nothing: nothing is written unless every task validates
        for group in &event.groups {
            for task in &group.tasks {
                task.status.parse::<TaskStatus>()?;
                parse_deadline(&task.deadline)?;
            }
        }

        let touched = self.store.upsert_order_tasks(event).await?;

        let order_key = cache_id(&event.order_id);
        for group in touched {
            let group_key = cache_id(&group.group_id);
            if group.tasks.is_empty() {
                self.cache.invalidate_group(&order_key, &group_key).await;
            } else {
                self.cache
                    .set(&order_key, &group_key, &group.group_name, &group.tasks)
                    .await;
            }
        }

        Ok(())
    }

    /// Every task of the requested order (not cached)
    #[instrument(skip(self, request), fields(request_id = %request.request_id, order_id = %request.order_id))]
    pub async fn build_order_tasks_response(&self, request: &OrderTasksRequest) -> ServiceResult<OrderTasksResponse> {
        let order = parse_uuid("order_id", &request.order_id)?;
        let tasks = self.store.order_tasks_for_response(order).await?;

        Ok(OrderTasksResponse {
            tasks,
            ..OrderTasksResponse::for_request(request)
        })
    }

    /// Apply a status batch and drop the order's cache entries.
    ///
    /// The affected groups aren't known here, so the whole order goes.
    #[instrument(skip(self, event), fields(order_id = %event.order_id, updates = event.updates.len()))]
    pub async fn apply_task_updates(&self, event: &UpdateTasksEvent) -> ServiceResult<usize> {
        for update in &event.updates {
            update.status.parse::<TaskStatus>()?;
        }

        let changed = self.store.apply_task_updates(event).await?;
        self.cache.invalidate_order(&cache_id(&event.order_id)).await;

        debug!(changed, "Applied status batch");
        Ok(changed)
    }
}

#[async_trait]
impl EventHandler for RegistryService {
    async fn handle_orders_tasks_upsert(&self, event: &OrdersTasksEvent) -> Result<(), RegistryError> {
        RegistryService::handle_orders_tasks_upsert(self, event).await
    }

    async fn build_order_tasks_response(
        &self,
        request: &OrderTasksRequest,
    ) -> Result<OrderTasksResponse, RegistryError> {
        RegistryService::build_order_tasks_response(self, request).await
    }

    async fn apply_task_updates(&self, event: &UpdateTasksEvent) -> Result<(), RegistryError> {
        RegistryService::apply_task_updates(self, event).await.map(|_| ())
    }
}
