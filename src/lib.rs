//! taskreg - Event-driven order/task registry
//!
//! Tracks Orders → Groups → Tasks. Broker events drive writes and reads
//! against a durable store through a cache-aside layer, and pull requests
//! are answered on a response topic.
//!
//! # Architecture
//!
//! The store is the source of truth; the cache is a disposable projection:
//! - Reads go to the cache first and fill it from the store on a miss
//! - Single status changes patch the cached group in place
//! - Bulk changes rewrite or drop whole cache entries
//!
//! Inbound messages are committed only once handled (or found undecodable),
//! so a crash means redelivery, never loss.
//!
//! # Modules
//!
//! - `broker`: Topic logs and consumer groups (memory, JSONL, NATS)
//! - `cache`: TTL caches over a key-value backend
//! - `core`: Orchestration service and teammate directory
//! - `domain`: Data structures (Task, Group, events, errors)
//! - `ingest`: Per-topic ingestion loops, metrics, response publishing
//! - `store`: SQLite persistence
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the ingestion loops
//! taskreg serve
//!
//! # Feed an upsert event
//! taskreg publish orders --input order.json
//!
//! # Inspect a group
//! taskreg tasks <order-id> <group-id>
//! ```

pub mod broker;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod store;

// Re-export main types at crate root for convenience
pub use cache::{GroupCache, MemoryKv, ReferenceCache, TaskCache};
pub use core::{RegistryService, TeammateDirectory};
pub use domain::{ErrorKind, Group, GroupSnapshot, RegistryError, Task, TaskStatus};
pub use ingest::{IngestionManager, Metrics, Shutdown};
pub use store::{SqliteStore, TaskStore, TeammateStore};
