//! Order, group and task types.
//!
//! Orders are the top-level containers; each owns named groups, and each
//! group owns tasks. Task ids are unique within an order, not globally.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::RegistryError;

/// Wire/date format for task deadlines (`DD.MM.YYYY`)
pub const DEADLINE_FORMAT: &str = "%d.%m.%Y";

/// A named subdivision of an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group identifier (scoped to its order)
    #[serde(rename = "group_id")]
    pub id: Uuid,

    /// Human-readable name
    #[serde(rename = "group_name")]
    pub name: String,
}

/// A unit of work inside a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier, unique within the order
    pub id: i64,

    /// Current status
    pub status: TaskStatus,

    /// Optional due date
    #[serde(with = "deadline_format", default)]
    pub deadline: Option<NaiveDate>,
}

impl Task {
    pub fn new(id: i64, status: TaskStatus) -> Self {
        Self {
            id,
            status,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Allowed task statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    New,
    InProgress,
    Review,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        Self::New,
        Self::InProgress,
        Self::Review,
        Self::Done,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::InProgress => "InProgress",
            Self::Review => "Review",
            Self::Done => "Done",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| RegistryError::InvalidStatus(s.to_string()))
    }
}

/// Group name plus its ordered task list, as stored in the cache
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group_name: String,
    pub tasks: Vec<Task>,
}

/// Resulting task set of one group after a bulk upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTasks {
    pub group_id: String,
    pub group_name: String,
    pub tasks: Vec<Task>,
}

/// Flattened task record used in order-wide responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTaskRecord {
    pub task_id: i64,
    pub group_id: Uuid,
    pub group_name: String,
    pub status: TaskStatus,
    #[serde(with = "deadline_format", default)]
    pub deadline: Option<NaiveDate>,
}

/// Parse an identifier that must be a UUID
pub fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, RegistryError> {
    Uuid::parse_str(value.trim()).map_err(|_| RegistryError::InvalidIdentifier {
        field,
        value: value.to_string(),
    })
}

/// Parse a task id (64-bit integer, surrounding whitespace allowed)
pub fn parse_task_id(value: &str) -> Result<i64, RegistryError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| RegistryError::InvalidIdentifier {
            field: "task_id",
            value: value.to_string(),
        })
}

/// Parse a wire deadline; the empty string means "no deadline"
pub fn parse_deadline(value: &str) -> Result<Option<NaiveDate>, RegistryError> {
    if value.is_empty() {
        return Ok(None);
    }

    parse_wire_date(value)
        .map(Some)
        .ok_or_else(|| RegistryError::InvalidDeadline(value.to_string()))
}

/// Strict `DD.MM.YYYY`: exactly two, two and four digits.
///
/// chrono alone accepts single-digit fields, short years and leading
/// whitespace, so the shape is checked first.
fn parse_wire_date(value: &str) -> Option<NaiveDate> {
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[2] == b'.'
        && bytes[5] == b'.'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 2 || i == 5 || b.is_ascii_digit());
    if !shaped {
        return None;
    }

    NaiveDate::parse_from_str(value, DEADLINE_FORMAT).ok()
}

/// Serde adapter: `Option<NaiveDate>` <-> `"DD.MM.YYYY"` / `""`
pub mod deadline_format {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{parse_wire_date, DEADLINE_FORMAT};

    pub fn serialize<S>(value: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(date) => serializer.serialize_str(&date.format(DEADLINE_FORMAT).to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => parse_wire_date(s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid deadline {s:?}"))),
        }
    }
}
