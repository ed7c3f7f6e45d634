//! Ingestion metrics.
//!
//! Counters are recorded through the `metrics` facade and land in whatever
//! recorder is installed: the Prometheus exporter under `serve`, nothing at
//! all when no recorder is set up.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, Counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

use crate::domain::ErrorKind;

// ============================================================================
// Metric Names
// ============================================================================

/// Messages taken off an inbound topic.
pub const MESSAGES_RECEIVED: &str = "taskreg_messages_received_total";

/// Messages handled successfully.
pub const MESSAGES_PROCESSED: &str = "taskreg_messages_processed_total";

/// Handling failures, labelled by `kind`.
pub const ERRORS: &str = "taskreg_errors_total";

// ============================================================================
// Registration
// ============================================================================

/// Registers metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(MESSAGES_RECEIVED, "Total messages received by the ingestion loops");
    describe_counter!(MESSAGES_PROCESSED, "Total messages handled successfully");
    describe_counter!(ERRORS, "Total message handling errors by kind");
}

/// Install the Prometheus recorder with a scrape endpoint on `listen`.
///
/// Must run inside the tokio runtime, which hosts the HTTP listener.
pub fn install_prometheus(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    register_metrics();

    info!(%listen, "Prometheus metrics endpoint started");
    Ok(())
}

// ============================================================================
// Recording
// ============================================================================

/// Counter handles shared by the ingestion loops.
///
/// Handles bind to the recorder that is current when [`Metrics::new`] runs,
/// so install the recorder first.
#[derive(Clone)]
pub struct Metrics {
    received: Counter,
    processed: Counter,
    errors: [Counter; ErrorKind::ALL.len()],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            received: counter!(MESSAGES_RECEIVED),
            processed: counter!(MESSAGES_PROCESSED),
            errors: ErrorKind::ALL.map(|kind| counter!(ERRORS, "kind" => kind.as_str())),
        }
    }

    pub fn record_received(&self) {
        self.received.increment(1);
    }

    pub fn record_processed(&self) {
        self.processed.increment(1);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.errors[kind as usize].increment(1);
    }
}
