//! SQLite-backed store.
//!
//! `rusqlite::Connection` is not `Sync`, so the connection sits behind a
//! mutex and every call runs on tokio's blocking pool. Multi-statement
//! operations run inside one transaction.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::query::PlayerQuery;
use super::{StoreError, StoreResult, TaskStore, TeammateStore};
use crate::domain::{
    parse_deadline, parse_uuid, Group, GroupSnapshot, GroupTasks, NewPlayer, OrderTaskRecord,
    OrdersTasksEvent, PlayerProfile, ReferenceCategory, ReferenceItem, Task, TaskStatus,
    TeammateFilter, UpdateTasksEvent,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS task_groups (
    order_id   TEXT NOT NULL,
    group_id   TEXT NOT NULL,
    group_name TEXT NOT NULL,
    PRIMARY KEY (order_id, group_id)
);

CREATE TABLE IF NOT EXISTS tasks (
    order_id TEXT    NOT NULL,
    task_id  INTEGER NOT NULL,
    group_id TEXT    NOT NULL,
    status   TEXT    NOT NULL,
    deadline TEXT,
    PRIMARY KEY (order_id, task_id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_group ON tasks (order_id, group_id);

CREATE TABLE IF NOT EXISTS games     (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE);
CREATE TABLE IF NOT EXISTS genres    (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE);
CREATE TABLE IF NOT EXISTS languages (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE);
CREATE TABLE IF NOT EXISTS apps      (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE);

CREATE TABLE IF NOT EXISTS players (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT    NOT NULL UNIQUE,
    age         INTEGER NOT NULL,
    description TEXT    NOT NULL DEFAULT '',
    game_id     INTEGER REFERENCES games (id),
    genre_id    INTEGER REFERENCES genres (id),
    language_id INTEGER REFERENCES languages (id),
    app_id      INTEGER REFERENCES apps (id)
);
"#;

/// Storage date format (ISO, sortable)
const STORED_DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite implementation of [`TaskStore`] and [`TeammateStore`]
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

/// Upsert payload after validation
struct ParsedGroup {
    id: Uuid,
    name: String,
    tasks: Vec<Task>,
}

fn parse_upsert(event: &OrdersTasksEvent) -> StoreResult<(Uuid, Vec<ParsedGroup>)> {
    let order_id = parse_uuid("order_id", &event.order_id)?;

    let mut groups = Vec::with_capacity(event.groups.len());
    for group in &event.groups {
        let mut tasks = Vec::with_capacity(group.tasks.len());
        for task in &group.tasks {
            tasks.push(Task {
                id: task.id,
                status: task.status.parse()?,
                deadline: parse_deadline(&task.deadline)?,
            });
        }
        groups.push(ParsedGroup {
            id: parse_uuid("group_id", &group.group_id)?,
            name: group.group_name.clone(),
            tasks,
        });
    }

    Ok((order_id, groups))
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn uuid_column(row: &Row<'_>, column: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(column)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(column, e))
}

fn status_column(row: &Row<'_>, column: usize) -> rusqlite::Result<TaskStatus> {
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e| conversion_error(column, e))
}

fn deadline_column(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, STORED_DATE_FORMAT))
        .transpose()
        .map_err(|e| conversion_error(column, e))
}

fn stored_deadline(deadline: Option<NaiveDate>) -> Option<String> {
    deadline.map(|d| d.format(STORED_DATE_FORMAT).to_string())
}

fn load_tasks(conn: &Connection, order_id: &str, group_id: &str) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare_cached(
        "SELECT task_id, status, deadline FROM tasks
         WHERE order_id = ?1 AND group_id = ?2
         ORDER BY task_id",
    )?;

    let tasks = stmt
        .query_map(params![order_id, group_id], |row| {
            Ok(Task {
                id: row.get(0)?,
                status: status_column(row, 1)?,
                deadline: deadline_column(row, 2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(tasks)
}

fn load_group_name(
    conn: &Connection,
    order_id: &str,
    group_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT group_name FROM task_groups WHERE order_id = ?1 AND group_id = ?2",
        params![order_id, group_id],
        |row| row.get(0),
    )
    .optional()
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_groups(&self, order_id: Uuid) -> StoreResult<Vec<Group>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT group_id, group_name FROM task_groups
                 WHERE order_id = ?1
                 ORDER BY group_name, group_id",
            )?;
            let groups = stmt
                .query_map(params![order_id.to_string()], |row| {
                    Ok(Group {
                        id: uuid_column(row, 0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(groups)
        })
        .await
    }

    async fn list_group_tasks(&self, order_id: Uuid, group_id: Uuid) -> StoreResult<GroupSnapshot> {
        self.with_conn(move |conn| {
            let order = order_id.to_string();
            let group = group_id.to_string();

            let Some(group_name) = load_group_name(conn, &order, &group)? else {
                return Ok(GroupSnapshot::default());
            };
            let tasks = load_tasks(conn, &order, &group)?;

            Ok(GroupSnapshot { group_name, tasks })
        })
        .await
    }

    async fn update_task_status(
        &self,
        order_id: Uuid,
        task_id: i64,
        status: TaskStatus,
    ) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = ?1 WHERE order_id = ?2 AND task_id = ?3",
                params![status.as_str(), order_id.to_string(), task_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn task_group_id(&self, order_id: Uuid, task_id: i64) -> StoreResult<Option<Uuid>> {
        self.with_conn(move |conn| {
            let group = conn
                .query_row(
                    "SELECT group_id FROM tasks WHERE order_id = ?1 AND task_id = ?2",
                    params![order_id.to_string(), task_id],
                    |row| uuid_column(row, 0),
                )
                .optional()?;
            Ok(group)
        })
        .await
    }

    async fn order_tasks_for_response(&self, order_id: Uuid) -> StoreResult<Vec<OrderTaskRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT t.task_id, t.group_id, g.group_name, t.status, t.deadline
                 FROM tasks t
                 JOIN task_groups g ON g.order_id = t.order_id AND g.group_id = t.group_id
                 WHERE t.order_id = ?1
                 ORDER BY g.group_name, t.task_id",
            )?;
            let records = stmt
                .query_map(params![order_id.to_string()], |row| {
                    Ok(OrderTaskRecord {
                        task_id: row.get(0)?,
                        group_id: uuid_column(row, 1)?,
                        group_name: row.get(2)?,
                        status: status_column(row, 3)?,
                        deadline: deadline_column(row, 4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn upsert_order_tasks(&self, event: &OrdersTasksEvent) -> StoreResult<Vec<GroupTasks>> {
        let (order_id, groups) = parse_upsert(event)?;

        self.with_conn(move |conn| {
            let order = order_id.to_string();
            let listed: HashSet<String> = groups.iter().map(|g| g.id.to_string()).collect();
            let mut touched: Vec<String> = groups.iter().map(|g| g.id.to_string()).collect();

            let tx = conn.transaction()?;

            for group in &groups {
                let group_key = group.id.to_string();

                tx.execute(
                    "INSERT INTO task_groups (order_id, group_id, group_name) VALUES (?1, ?2, ?3)
                     ON CONFLICT (order_id, group_id) DO UPDATE SET group_name = excluded.group_name",
                    params![order, group_key, group.name],
                )?;

                // The payload is authoritative for the groups it names
                let keep: HashSet<i64> = group.tasks.iter().map(|t| t.id).collect();
                for existing in load_tasks(&tx, &order, &group_key)? {
                    if !keep.contains(&existing.id) {
                        tx.execute(
                            "DELETE FROM tasks WHERE order_id = ?1 AND task_id = ?2",
                            params![order, existing.id],
                        )?;
                    }
                }

                for task in &group.tasks {
                    let previous: Option<String> = tx
                        .query_row(
                            "SELECT group_id FROM tasks WHERE order_id = ?1 AND task_id = ?2",
                            params![order, task.id],
                            |row| row.get(0),
                        )
                        .optional()?;

                    if let Some(previous) = previous {
                        if previous != group_key && !listed.contains(&previous) && !touched.contains(&previous) {
                            touched.push(previous);
                        }
                    }

                    tx.execute(
                        "INSERT INTO tasks (order_id, task_id, group_id, status, deadline)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT (order_id, task_id) DO UPDATE SET
                             group_id = excluded.group_id,
                             status = excluded.status,
                             deadline = excluded.deadline",
                        params![
                            order,
                            task.id,
                            group_key,
                            task.status.as_str(),
                            stored_deadline(task.deadline)
                        ],
                    )?;
                }
            }

            let mut result = Vec::with_capacity(touched.len());
            for group_key in touched {
                let group_name = load_group_name(&tx, &order, &group_key)?.unwrap_or_default();
                let tasks = load_tasks(&tx, &order, &group_key)?;
                result.push(GroupTasks {
                    group_id: group_key,
                    group_name,
                    tasks,
                });
            }

            tx.commit()?;
            debug!(order_id = %order, groups = result.len(), "Upserted order tasks");

            Ok(result)
        })
        .await
    }

    async fn apply_task_updates(&self, event: &UpdateTasksEvent) -> StoreResult<usize> {
        let order_id = parse_uuid("order_id", &event.order_id)?;
        let updates = event
            .updates
            .iter()
            .map(|u| Ok((u.task_id, u.status.parse::<TaskStatus>()?)))
            .collect::<StoreResult<Vec<_>>>()?;

        self.with_conn(move |conn| {
            let order = order_id.to_string();
            let tx = conn.transaction()?;

            let mut changed = 0;
            for (task_id, status) in &updates {
                changed += tx.execute(
                    "UPDATE tasks SET status = ?1 WHERE order_id = ?2 AND task_id = ?3",
                    params![status.as_str(), order, task_id],
                )?;
            }

            tx.commit()?;
            Ok(changed)
        })
        .await
    }
}

#[async_trait]
impl TeammateStore for SqliteStore {
    async fn list_reference(&self, category: ReferenceCategory) -> StoreResult<Vec<ReferenceItem>> {
        self.with_conn(move |conn| {
            // Table names come from a closed enum, never from callers
            let sql = format!("SELECT id, name FROM {} ORDER BY id", category.as_str());
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map([], |row| {
                    Ok(ReferenceItem {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }

    async fn insert_reference(&self, category: ReferenceCategory, name: &str) -> StoreResult<i64> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let table = category.as_str();
            conn.execute(
                &format!("INSERT INTO {table} (name) VALUES (?1) ON CONFLICT (name) DO NOTHING"),
                params![name],
            )?;
            let id = conn.query_row(
                &format!("SELECT id FROM {table} WHERE name = ?1"),
                params![name],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    async fn upsert_player(&self, player: &NewPlayer) -> StoreResult<()> {
        let player = player.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO players (username, age, description, game_id, genre_id, language_id, app_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (username) DO UPDATE SET
                     age = excluded.age,
                     description = excluded.description,
                     game_id = excluded.game_id,
                     genre_id = excluded.genre_id,
                     language_id = excluded.language_id,
                     app_id = excluded.app_id",
                params![
                    player.username,
                    player.age,
                    player.description,
                    player.game_id,
                    player.genre_id,
                    player.language_id,
                    player.app_id
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn search_players(&self, filter: &TeammateFilter) -> StoreResult<Vec<PlayerProfile>> {
        let query = PlayerQuery::from_filter(filter);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(query.sql())?;
            let players = stmt
                .query_map(params_from_iter(query.params().iter()), |row| {
                    Ok(PlayerProfile {
                        username: row.get(0)?,
                        age: row.get(1)?,
                        description: row.get(2)?,
                        game: row.get(3)?,
                        genre: row.get(4)?,
                        app: row.get(5)?,
                        language: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(players)
        })
        .await
    }
}
