//! In-process broker for tests and embedded runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Broker, BrokerError, Consumer, Message, Producer};
use crate::ingest::Shutdown;

#[derive(Default)]
struct State {
    topics: HashMap<String, Vec<Vec<u8>>>,
    /// Next unconsumed offset per (group, topic)
    committed: HashMap<(String, String), u64>,
}

struct Shared {
    state: Mutex<State>,
    /// Bumped on every append so waiting consumers re-check
    appended: watch::Sender<u64>,
}

impl Shared {
    fn state(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Backend("broker state poisoned".to_string()))
    }
}

/// Broker keeping every topic in memory
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                appended,
            }),
        }
    }

    /// Append a raw payload, returning its offset
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<u64, BrokerError> {
        let offset = {
            let mut state = self.shared.state()?;
            let log = state.topics.entry(topic.to_string()).or_default();
            log.push(payload.into());
            (log.len() - 1) as u64
        };
        self.shared.appended.send_modify(|n| *n += 1);
        Ok(offset)
    }

    /// Every payload ever written to `topic`
    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.shared
            .state()
            .map(|s| s.topics.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Next unconsumed offset for the group, if it ever committed
    pub fn committed_offset(&self, group: &str, topic: &str) -> Option<u64> {
        self.shared
            .state()
            .ok()?
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn consumer(&self, topic: &str, group: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        let position = self.committed_offset(group, topic).unwrap_or(0);
        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            appended: self.shared.appended.subscribe(),
            topic: topic.to_string(),
            group: group.to_string(),
            position,
        }))
    }

    async fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>, BrokerError> {
        Ok(Arc::new(MemoryProducer {
            broker: self.clone(),
            topic: topic.to_string(),
        }))
    }
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    appended: watch::Receiver<u64>,
    topic: String,
    group: String,
    position: u64,
}

impl MemoryConsumer {
    fn next_available(&self) -> Result<Option<Message>, BrokerError> {
        let state = self.shared.state()?;
        let payload = state
            .topics
            .get(&self.topic)
            .and_then(|log| log.get(self.position as usize))
            .cloned();

        Ok(payload.map(|payload| Message {
            topic: self.topic.clone(),
            offset: self.position,
            payload,
        }))
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn fetch(&mut self, shutdown: &Shutdown) -> Result<Option<Message>, BrokerError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }

            // Mark seen before reading so an append in between still wakes us
            self.appended.borrow_and_update();
            if let Some(message) = self.next_available()? {
                self.position += 1;
                return Ok(Some(message));
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                changed = self.appended.changed() => {
                    changed.map_err(|_| BrokerError::Closed)?;
                }
            }
        }
    }

    async fn commit(&mut self, message: &Message) -> Result<(), BrokerError> {
        let mut state = self.shared.state()?;
        let next = state
            .committed
            .entry((self.group.clone(), self.topic.clone()))
            .or_insert(0);
        *next = (*next).max(message.offset + 1);
        Ok(())
    }
}

struct MemoryProducer {
    broker: MemoryBroker,
    topic: String,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn send(&self, payload: &[u8]) -> Result<(), BrokerError> {
        self.broker.publish(&self.topic, payload)?;
        Ok(())
    }
}
