//! Registry error taxonomy.

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the orchestration service
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid {field}: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("Invalid task status: {0:?}")]
    InvalidStatus(String),

    #[error("Invalid deadline (expected DD.MM.YYYY): {0:?}")]
    InvalidDeadline(String),

    #[error("Task {task_id} not found in order {order_id}")]
    TaskNotFound { order_id: String, task_id: i64 },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("{0}")]
    Unknown(String),
}

/// Coarse classification used for metrics and caller-facing outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    InvalidStatus,
    InvalidDeadline,
    TaskNotFound,
    Transport,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        Self::InvalidInput,
        Self::InvalidStatus,
        Self::InvalidDeadline,
        Self::TaskNotFound,
        Self::Transport,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InvalidStatus => "invalid_status",
            Self::InvalidDeadline => "invalid_deadline",
            Self::TaskNotFound => "task_not_found",
            Self::Transport => "transport",
            Self::Unknown => "unknown",
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidInput,
            Self::InvalidStatus(_) => ErrorKind::InvalidStatus,
            Self::InvalidDeadline(_) => ErrorKind::InvalidDeadline,
            Self::TaskNotFound { .. } => ErrorKind::TaskNotFound,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// True for errors detected before any I/O took place
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidInput | ErrorKind::InvalidStatus | ErrorKind::InvalidDeadline
        )
    }

    /// HTTP status code an HTTP front-end should answer with
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput | ErrorKind::InvalidStatus | ErrorKind::InvalidDeadline => 400,
            ErrorKind::TaskNotFound => 404,
            ErrorKind::Transport | ErrorKind::Unknown => 500,
        }
    }
}
