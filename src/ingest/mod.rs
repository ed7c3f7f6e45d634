//! Event ingestion pipeline.
//!
//! Broker topics feed the orchestration service; pull requests are answered
//! on the response topic.
//!
//! # Architecture
//!
//! ```text
//! orders.tasks ────────┐
//! get.order.tasks ─────┼─→ IngestionManager ─→ EventHandler ─→ {Store, Cache}
//! update.tasks.status ─┘          │
//!                                 └─→ ResponsePublisher ─→ order.tasks.response
//! ```

pub mod manager;
pub mod metrics;
pub mod publisher;
pub mod shutdown;

// Re-export key types
pub use manager::{Consumers, EventHandler, IngestError, IngestionManager, Stream, Subscription, Topics};
pub use self::metrics::{install_prometheus, register_metrics, Metrics};
pub use publisher::ResponsePublisher;
pub use shutdown::Shutdown;
