//! NATS JetStream broker.
//!
//! Each topic maps to one stream with a single subject (the topic name) and
//! each consumer group to a durable pull consumer. JetStream acknowledges per
//! message, so a commit acks the given message and every earlier one still
//! pending on this consumer. Unacked messages come back after the consumer's
//! ack wait.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use super::{Broker, BrokerError, Consumer, Message, Producer};
use crate::ingest::Shutdown;

fn backend<E: std::fmt::Display>(err: E) -> BrokerError {
    BrokerError::Backend(err.to_string())
}

/// Stream and durable names may not contain `.`
fn jetstream_name(name: &str) -> String {
    name.replace(['.', ' ', '*', '>'], "_")
}

#[derive(Clone)]
pub struct NatsBroker {
    context: jetstream::Context,
}

impl NatsBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = async_nats::connect(url).await.map_err(backend)?;
        info!(url, "Connected to NATS");
        Ok(Self {
            context: jetstream::new(client),
        })
    }

    async fn stream(&self, topic: &str) -> Result<stream::Stream, BrokerError> {
        self.context
            .get_or_create_stream(stream::Config {
                name: jetstream_name(topic),
                subjects: vec![topic.to_string()],
                retention: stream::RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .map_err(backend)
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn consumer(&self, topic: &str, group: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        let durable = jetstream_name(group);
        let pull = self
            .stream(topic)
            .await?
            .get_or_create_consumer(
                &durable,
                consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(backend)?;
        let messages = pull.messages().await.map_err(backend)?;

        debug!(topic, group, "JetStream consumer ready");
        Ok(Box::new(NatsConsumer {
            topic: topic.to_string(),
            messages,
            pending: BTreeMap::new(),
        }))
    }

    async fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>, BrokerError> {
        self.stream(topic).await?;
        Ok(Arc::new(NatsProducer {
            context: self.context.clone(),
            topic: topic.to_string(),
        }))
    }
}

struct NatsConsumer {
    topic: String,
    messages: consumer::pull::Stream,
    /// Delivered but not yet acked, by stream sequence
    pending: BTreeMap<u64, jetstream::Message>,
}

#[async_trait]
impl Consumer for NatsConsumer {
    async fn fetch(&mut self, shutdown: &Shutdown) -> Result<Option<Message>, BrokerError> {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            next = self.messages.next() => next,
        };

        let delivered = next.ok_or(BrokerError::Closed)?.map_err(backend)?;
        let offset = delivered.info().map_err(backend)?.stream_sequence;
        let payload = delivered.payload.to_vec();
        self.pending.insert(offset, delivered);

        Ok(Some(Message {
            topic: self.topic.clone(),
            offset,
            payload,
        }))
    }

    async fn commit(&mut self, message: &Message) -> Result<(), BrokerError> {
        let later = self.pending.split_off(&(message.offset + 1));
        let done = std::mem::replace(&mut self.pending, later);

        for (_, delivered) in done {
            delivered.ack().await.map_err(backend)?;
        }
        Ok(())
    }
}

struct NatsProducer {
    context: jetstream::Context,
    topic: String,
}

#[async_trait]
impl Producer for NatsProducer {
    async fn send(&self, payload: &[u8]) -> Result<(), BrokerError> {
        self.context
            .publish(self.topic.clone(), Bytes::copy_from_slice(payload))
            .await
            .map_err(backend)?
            .await
            .map_err(backend)?;
        Ok(())
    }
}
