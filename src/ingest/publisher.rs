//! Outbound responses.

use std::sync::Arc;

use tracing::debug;

use crate::broker::{BrokerError, Producer};
use crate::domain::OrderTasksResponse;

/// Serializes responses onto the response topic
#[derive(Clone)]
pub struct ResponsePublisher {
    producer: Arc<dyn Producer>,
}

impl ResponsePublisher {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        Self { producer }
    }

    /// Publish and wait for the broker to accept the write
    pub async fn send_order_tasks_response(
        &self,
        response: &OrderTasksResponse,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(response)?;
        self.producer.send(&payload).await?;

        debug!(
            request_id = %response.request_id,
            order_id = %response.order_id,
            tasks = response.tasks.len(),
            "Published order tasks response"
        );
        Ok(())
    }
}
