//! Message broker abstraction.
//!
//! Topics are append-only logs addressed by offset. A consumer belongs to a
//! consumer group; committing a message marks it and every earlier message
//! of that topic as consumed for the group. Anything past the last commit is
//! delivered again to the next consumer of the same group.

pub mod jsonl;
pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::ingest::Shutdown;

pub use jsonl::JsonlBroker;
pub use memory::MemoryBroker;
#[cfg(feature = "nats")]
pub use nats::NatsBroker;

/// Errors raised by broker backends
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt log {topic} at offset {offset}: {reason}")]
    Corrupt {
        topic: String,
        offset: u64,
        reason: String,
    },

    #[error("Payload rejected by {topic}: {reason}")]
    InvalidPayload { topic: String, reason: String },

    #[error("Broker closed")]
    Closed,

    #[error("Broker backend error: {0}")]
    Backend(String),
}

/// One delivered record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Reader bound to one (topic, consumer group)
#[async_trait]
pub trait Consumer: Send {
    /// Next message; blocks until one arrives. `None` once `shutdown` fires.
    async fn fetch(&mut self, shutdown: &Shutdown) -> Result<Option<Message>, BrokerError>;

    /// Mark `message` and everything before it as consumed
    async fn commit(&mut self, message: &Message) -> Result<(), BrokerError>;
}

/// Writer bound to one topic
#[async_trait]
pub trait Producer: Send + Sync {
    async fn send(&self, payload: &[u8]) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn consumer(&self, topic: &str, group: &str) -> Result<Box<dyn Consumer>, BrokerError>;

    async fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>, BrokerError>;
}
