//! Event ingestion loops.
//!
//! One sequential loop per inbound topic. Each message is decoded, handed to
//! the [`EventHandler`], and committed according to the outcome:
//!
//! | outcome                         | orders / updates | requests   |
//! |---------------------------------|------------------|------------|
//! | undecodable payload             | commit           | commit     |
//! | handler error                   | no commit        | commit     |
//! | response publish error          |                  | no commit  |
//! | success                         | commit           | commit     |
//!
//! A fetch or commit failure stops its loop and, through a child shutdown
//! scope, the sibling loops.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::metrics::Metrics;
use super::publisher::ResponsePublisher;
use super::shutdown::Shutdown;
use crate::broker::{Broker, BrokerError, Consumer, Message};
use crate::domain::{
    ErrorKind, OrderTasksRequest, OrderTasksResponse, OrdersTasksEvent, RegistryError,
    UpdateTasksEvent,
};

/// Errors that stop ingestion
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Fetch from {topic} failed: {source}")]
    Fetch {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("Commit on {topic} failed: {source}")]
    Commit {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("Subscribing to {topic} failed: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("Ingestion loop panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Service surface the loops drive
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_orders_tasks_upsert(&self, event: &OrdersTasksEvent) -> Result<(), RegistryError>;

    async fn build_order_tasks_response(
        &self,
        request: &OrderTasksRequest,
    ) -> Result<OrderTasksResponse, RegistryError>;

    async fn apply_task_updates(&self, event: &UpdateTasksEvent) -> Result<(), RegistryError>;
}

/// Topic names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    /// Bulk upserts
    pub orders: String,
    /// Pull requests for an order's tasks
    pub requests: String,
    /// Status update batches
    pub updates: String,
    /// Responses to pull requests
    pub responses: String,
    /// Teammate search filters, published for analytics
    pub filter_data: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            orders: "orders.tasks".to_string(),
            requests: "get.order.tasks".to_string(),
            updates: "update.tasks.status".to_string(),
            responses: "order.tasks.response".to_string(),
            filter_data: "filter.data".to_string(),
        }
    }
}

/// The three inbound streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Orders,
    Requests,
    Updates,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Self::Orders, Self::Requests, Self::Updates];

    /// Suffix appended to the consumer group prefix
    pub fn group_suffix(&self) -> &'static str {
        match self {
            Self::Orders => "-orders",
            Self::Requests => "-requests",
            Self::Updates => "-updates",
        }
    }

    pub fn topic<'a>(&self, topics: &'a Topics) -> &'a str {
        match self {
            Self::Orders => &topics.orders,
            Self::Requests => &topics.requests,
            Self::Updates => &topics.updates,
        }
    }
}

/// A consumer together with the topic it reads
pub struct Subscription {
    pub topic: String,
    pub consumer: Box<dyn Consumer>,
}

/// One subscription per inbound stream
pub struct Consumers {
    pub orders: Subscription,
    pub requests: Subscription,
    pub updates: Subscription,
}

impl Consumers {
    /// Subscribe all three streams with `<group_prefix><suffix>` groups
    pub async fn subscribe(
        broker: &dyn Broker,
        topics: &Topics,
        group_prefix: &str,
    ) -> Result<Self, IngestError> {
        async fn one(
            broker: &dyn Broker,
            topics: &Topics,
            group_prefix: &str,
            stream: Stream,
        ) -> Result<Subscription, IngestError> {
            let topic = stream.topic(topics).to_string();
            let group = format!("{group_prefix}{}", stream.group_suffix());
            let consumer = broker
                .consumer(&topic, &group)
                .await
                .map_err(|source| IngestError::Subscribe {
                    topic: topic.clone(),
                    source,
                })?;
            Ok(Subscription { topic, consumer })
        }

        Ok(Self {
            orders: one(broker, topics, group_prefix, Stream::Orders).await?,
            requests: one(broker, topics, group_prefix, Stream::Requests).await?,
            updates: one(broker, topics, group_prefix, Stream::Updates).await?,
        })
    }
}

/// Whether a handled message may be committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Commit,
    Withhold,
}

#[derive(Clone)]
struct Dispatch {
    handler: Arc<dyn EventHandler>,
    publisher: ResponsePublisher,
    metrics: Arc<Metrics>,
}

impl Dispatch {
    fn decode<T: DeserializeOwned>(&self, message: &Message) -> Option<T> {
        match serde_json::from_slice(&message.payload) {
            Ok(event) => Some(event),
            Err(e) => {
                self.metrics.record_error(ErrorKind::InvalidInput);
                warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Dropping undecodable message"
                );
                None
            }
        }
    }

    fn failed(&self, message: &Message, err: &RegistryError) {
        self.metrics.record_error(err.kind());
        warn!(
            topic = %message.topic,
            offset = message.offset,
            kind = err.kind().as_str(),
            error = %err,
            "Event handling failed"
        );
    }

    async fn process(&self, stream: Stream, message: &Message) -> Disposition {
        match stream {
            Stream::Orders => {
                let Some(event) = self.decode::<OrdersTasksEvent>(message) else {
                    return Disposition::Commit;
                };
                match self.handler.handle_orders_tasks_upsert(&event).await {
                    Ok(()) => self.succeeded(),
                    Err(e) => {
                        self.failed(message, &e);
                        Disposition::Withhold
                    }
                }
            }

            Stream::Updates => {
                let Some(event) = self.decode::<UpdateTasksEvent>(message) else {
                    return Disposition::Commit;
                };
                match self.handler.apply_task_updates(&event).await {
                    Ok(()) => self.succeeded(),
                    Err(e) => {
                        self.failed(message, &e);
                        Disposition::Withhold
                    }
                }
            }

            Stream::Requests => {
                let Some(request) = self.decode::<OrderTasksRequest>(message) else {
                    return Disposition::Commit;
                };
                let response = match self.handler.build_order_tasks_response(&request).await {
                    Ok(response) => response,
                    Err(e) => {
                        // A bad request stays bad on redelivery
                        self.failed(message, &e);
                        return Disposition::Commit;
                    }
                };

                if let Err(e) = self.publisher.send_order_tasks_response(&response).await {
                    self.metrics.record_error(ErrorKind::Transport);
                    warn!(
                        request_id = %request.request_id,
                        error = %e,
                        "Publishing response failed"
                    );
                    return Disposition::Withhold;
                }
                self.succeeded()
            }
        }
    }

    fn succeeded(&self) -> Disposition {
        self.metrics.record_processed();
        Disposition::Commit
    }
}

async fn run_loop(
    stream: Stream,
    mut subscription: Subscription,
    dispatch: Dispatch,
    shutdown: Shutdown,
) -> Result<(), IngestError> {
    let topic = subscription.topic.clone();
    info!(topic = %topic, "Ingestion loop started");

    loop {
        let message = match subscription.consumer.fetch(&shutdown).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!(topic = %topic, "Ingestion loop stopped");
                return Ok(());
            }
            Err(source) => return Err(IngestError::Fetch { topic, source }),
        };

        dispatch.metrics.record_received();
        debug!(topic = %topic, offset = message.offset, "Received message");

        if dispatch.process(stream, &message).await == Disposition::Commit {
            subscription
                .consumer
                .commit(&message)
                .await
                .map_err(|source| IngestError::Commit {
                    topic: topic.clone(),
                    source,
                })?;
        }
    }
}

/// Runs the three ingestion loops until cancelled or one fails
pub struct IngestionManager {
    consumers: Consumers,
    dispatch: Dispatch,
}

impl IngestionManager {
    pub fn new(
        consumers: Consumers,
        handler: Arc<dyn EventHandler>,
        publisher: ResponsePublisher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            consumers,
            dispatch: Dispatch {
                handler,
                publisher,
                metrics,
            },
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.dispatch.metrics)
    }

    /// Run until `shutdown` fires (`Ok`) or a loop hits a fatal error.
    ///
    /// On a fatal error the sibling loops are cancelled through a child
    /// scope and the first error is returned; `shutdown` itself is left alone.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), IngestError> {
        let scope = shutdown.child();
        let Consumers {
            orders,
            requests,
            updates,
        } = self.consumers;

        let mut loops = JoinSet::new();
        for (stream, subscription) in [
            (Stream::Orders, orders),
            (Stream::Requests, requests),
            (Stream::Updates, updates),
        ] {
            loops.spawn(run_loop(
                stream,
                subscription,
                self.dispatch.clone(),
                scope.clone(),
            ));
        }

        let mut first_error = None;
        while let Some(joined) = loops.join_next().await {
            let Err(e) = joined.map_err(IngestError::from).and_then(|result| result) else {
                continue;
            };

            if first_error.is_none() {
                error!(error = %e, "Ingestion loop failed, stopping the others");
                scope.cancel();
                first_error = Some(e);
            } else {
                warn!(error = %e, "Additional ingestion loop failure");
            }
        }

        // Releases the scope's forwarder from the caller's shutdown
        scope.cancel();
        info!(failed = first_error.is_some(), "Ingestion stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
