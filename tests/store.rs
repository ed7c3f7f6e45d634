//! SQLite Store Integration Tests
//!
//! Upsert semantics, batch updates and persistence on an on-disk database.

use chrono::NaiveDate;
use taskreg::domain::{
    GroupPayload, OrdersTasksEvent, TaskPayload, TaskStatus, TaskStatusUpdate, UpdateTasksEvent,
};
use taskreg::store::{SqliteStore, StoreError, TaskStore};
use tempfile::TempDir;
use uuid::Uuid;

fn task(id: i64, status: &str, deadline: &str) -> TaskPayload {
    TaskPayload {
        id,
        status: status.to_string(),
        deadline: deadline.to_string(),
    }
}

fn group(id: Uuid, name: &str, tasks: Vec<TaskPayload>) -> GroupPayload {
    GroupPayload {
        group_id: id.to_string(),
        group_name: name.to_string(),
        tasks,
    }
}

fn upsert(order: Uuid, groups: Vec<GroupPayload>) -> OrdersTasksEvent {
    OrdersTasksEvent {
        order_id: order.to_string(),
        groups,
    }
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("taskreg.db");
    let (order, foundation) = (Uuid::new_v4(), Uuid::new_v4());

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .upsert_order_tasks(&upsert(
                order,
                vec![group(foundation, "Foundation", vec![task(1, "New", "15.06.2025")])],
            ))
            .await
            .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let snapshot = store.list_group_tasks(order, foundation).await.unwrap();
    assert_eq!(snapshot.group_name, "Foundation");
    assert_eq!(snapshot.tasks[0].deadline, NaiveDate::from_ymd_opt(2025, 6, 15));
}

#[tokio::test]
async fn test_upsert_replaces_named_group_contents() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (order, g) = (Uuid::new_v4(), Uuid::new_v4());

    store
        .upsert_order_tasks(&upsert(order, vec![group(g, "Roof", vec![task(1, "New", ""), task(2, "New", "")])]))
        .await
        .unwrap();

    // Second payload renames the group, drops task 1 and adds task 3
    let result = store
        .upsert_order_tasks(&upsert(
            order,
            vec![group(g, "Roof & gutters", vec![task(2, "Done", ""), task(3, "New", "")])],
        ))
        .await
        .unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result[0].group_name, "Roof & gutters");
    let ids: Vec<i64> = result[0].tasks.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(result[0].tasks[0].status, TaskStatus::Done);

    assert_eq!(store.task_group_id(order, 1).await.unwrap(), None);
}

#[tokio::test]
async fn test_moving_a_task_reports_the_group_it_left() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (order, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    store
        .upsert_order_tasks(&upsert(order, vec![group(a, "A", vec![task(1, "New", "")])]))
        .await
        .unwrap();

    let result = store
        .upsert_order_tasks(&upsert(order, vec![group(b, "B", vec![task(1, "Review", "")])]))
        .await
        .unwrap();

    // B now holds the task, A is reported (empty) so its cache entry can go
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].group_id, b.to_string());
    assert_eq!(result[0].tasks.len(), 1);
    assert_eq!(result[1].group_id, a.to_string());
    assert!(result[1].tasks.is_empty());

    assert_eq!(store.task_group_id(order, 1).await.unwrap(), Some(b));
}

#[tokio::test]
async fn test_upsert_rejects_bad_payload_atomically() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (order, g) = (Uuid::new_v4(), Uuid::new_v4());

    let err = store
        .upsert_order_tasks(&upsert(order, vec![group(g, "Walls", vec![task(1, "New", ""), task(2, "Paused", "")])]))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidStatus(_)));

    assert!(store.list_groups(order).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_update_skips_unknown_tasks() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (order, g) = (Uuid::new_v4(), Uuid::new_v4());
    store
        .upsert_order_tasks(&upsert(order, vec![group(g, "Walls", vec![task(1, "New", ""), task(2, "New", "")])]))
        .await
        .unwrap();

    let changed = store
        .apply_task_updates(&UpdateTasksEvent {
            order_id: order.to_string(),
            updates: vec![
                TaskStatusUpdate {
                    task_id: 2,
                    status: "InProgress".into(),
                },
                TaskStatusUpdate {
                    task_id: 99,
                    status: "Done".into(),
                },
            ],
        })
        .await
        .unwrap();

    assert_eq!(changed, 1);
    let snapshot = store.list_group_tasks(order, g).await.unwrap();
    assert_eq!(snapshot.tasks[1].status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_orders_are_isolated() {
    let store = SqliteStore::open_in_memory().unwrap();
    let (first, second, g) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    // Same group and task ids under two orders
    for order in [first, second] {
        store
            .upsert_order_tasks(&upsert(order, vec![group(g, "Shared name", vec![task(1, "New", "")])]))
            .await
            .unwrap();
    }

    assert!(store.update_task_status(first, 1, TaskStatus::Cancelled).await.unwrap());

    let other = store.order_tasks_for_response(second).await.unwrap();
    assert_eq!(other.len(), 1);
    assert_eq!(other[0].status, TaskStatus::New);
    assert_eq!(other[0].group_name, "Shared name");
}

#[tokio::test]
async fn test_groups_listed_by_name() {
    let store = SqliteStore::open_in_memory().unwrap();
    let order = Uuid::new_v4();

    store
        .upsert_order_tasks(&upsert(
            order,
            vec![
                group(Uuid::new_v4(), "Walls", vec![]),
                group(Uuid::new_v4(), "Foundation", vec![]),
            ],
        ))
        .await
        .unwrap();

    let names: Vec<String> = store
        .list_groups(order)
        .await
        .unwrap()
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(names, vec!["Foundation", "Walls"]);
}
