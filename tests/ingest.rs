//! Ingestion Integration Tests
//!
//! Commit behavior of the ingestion loops against the in-memory broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use taskreg::broker::{Broker, BrokerError, Consumer, Message, MemoryBroker, Producer};
use taskreg::domain::{
    OrderTasksRequest, OrderTasksResponse, OrdersTasksEvent, RegistryError, UpdateTasksEvent,
};
use taskreg::ingest::metrics::{ERRORS, MESSAGES_PROCESSED, MESSAGES_RECEIVED};
use taskreg::ingest::{
    Consumers, EventHandler, IngestError, IngestionManager, Metrics, ResponsePublisher, Shutdown,
    Subscription, Topics,
};

const PREFIX: &str = "test";

/// Handler double: counts calls, optionally fails every one
#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingHandler {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn record(&self, call: String) -> Result<(), RegistryError> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            Err(RegistryError::Transport("store unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_orders_tasks_upsert(&self, event: &OrdersTasksEvent) -> Result<(), RegistryError> {
        self.record(format!("upsert:{}", event.order_id))
    }

    async fn build_order_tasks_response(
        &self,
        request: &OrderTasksRequest,
    ) -> Result<OrderTasksResponse, RegistryError> {
        self.record(format!("request:{}", request.request_id))?;
        Ok(OrderTasksResponse::for_request(request))
    }

    async fn apply_task_updates(&self, event: &UpdateTasksEvent) -> Result<(), RegistryError> {
        self.record(format!("updates:{}", event.order_id))
    }
}

/// Producer whose writes always fail
struct FailingProducer {
    attempts: AtomicUsize,
}

#[async_trait]
impl Producer for FailingProducer {
    async fn send(&self, _payload: &[u8]) -> Result<(), BrokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(BrokerError::Backend("broker unreachable".into()))
    }
}

/// Consumer whose fetch always fails
struct BrokenConsumer;

#[async_trait]
impl Consumer for BrokenConsumer {
    async fn fetch(&mut self, _shutdown: &Shutdown) -> Result<Option<Message>, BrokerError> {
        Err(BrokerError::Backend("partition offline".into()))
    }

    async fn commit(&mut self, _message: &Message) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Counters recorded by one manager, isolated from other tests
struct Counters {
    snapshotter: Snapshotter,
}

impl Counters {
    /// Fresh recorder plus a `Metrics` bound to it
    fn install() -> (Self, Arc<Metrics>) {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let metrics = metrics::with_local_recorder(&recorder, Metrics::new);
        (Self { snapshotter }, Arc::new(metrics))
    }

    fn value(&self, name: &str, kind: Option<&str>) -> u64 {
        self.snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(key, _, _, value)| {
                let key = key.key();
                let labelled = key.labels().find(|l| l.key() == "kind").map(|l| l.value().to_string());
                match value {
                    DebugValue::Counter(n) if key.name() == name && labelled.as_deref() == kind => Some(n),
                    _ => None,
                }
            })
            .unwrap_or(0)
    }

    fn received(&self) -> u64 {
        self.value(MESSAGES_RECEIVED, None)
    }

    fn processed(&self) -> u64 {
        self.value(MESSAGES_PROCESSED, None)
    }

    fn errors(&self, kind: &str) -> u64 {
        self.value(ERRORS, Some(kind))
    }
}

struct Harness {
    broker: MemoryBroker,
    topics: Topics,
    handler: Arc<RecordingHandler>,
    counters: Counters,
    shutdown: Shutdown,
    running: tokio::task::JoinHandle<Result<(), IngestError>>,
}

impl Harness {
    async fn start(handler: RecordingHandler) -> Self {
        let broker = MemoryBroker::new();
        let publisher = ResponsePublisher::new(broker.producer(&Topics::default().responses).await.unwrap());
        Self::start_with(broker, handler, publisher).await
    }

    async fn start_with(broker: MemoryBroker, handler: RecordingHandler, publisher: ResponsePublisher) -> Self {
        let topics = Topics::default();
        let handler = Arc::new(handler);
        let (counters, metrics) = Counters::install();

        let consumers = Consumers::subscribe(&broker, &topics, PREFIX).await.unwrap();
        let manager = IngestionManager::new(consumers, handler.clone(), publisher, metrics);

        let shutdown = Shutdown::new();
        let scope = shutdown.clone();
        let running = tokio::spawn(async move { manager.run(&scope).await });

        Self {
            broker,
            topics,
            handler,
            counters,
            shutdown,
            running,
        }
    }

    /// Wait until `n` messages were received, then stop and join
    async fn settle(self, n: u64) -> (MemoryBroker, Arc<RecordingHandler>, Counters) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.counters.received() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages were not received in time");

        self.shutdown.cancel();
        self.running.await.unwrap().unwrap();
        (self.broker, self.handler, self.counters)
    }
}

fn upsert_payload() -> Vec<u8> {
    br#"{"order_id":"o-1","groups":[]}"#.to_vec()
}

fn request_payload() -> Vec<u8> {
    br#"{"request_id":"r-1","order_id":"o-1"}"#.to_vec()
}

fn updates_payload() -> Vec<u8> {
    br#"{"order_id":"o-1","updates":[{"task_id":1,"status":"Done"}]}"#.to_vec()
}

#[tokio::test]
async fn test_malformed_messages_are_committed_without_handling() {
    let harness = Harness::start(RecordingHandler::default()).await;
    let topics = harness.topics.clone();
    for topic in [&topics.orders, &topics.requests, &topics.updates] {
        harness.broker.publish(topic, "{not json").unwrap();
    }

    let (broker, handler, counters) = harness.settle(3).await;

    assert!(handler.calls().is_empty());
    assert_eq!(broker.committed_offset("test-orders", &topics.orders), Some(1));
    assert_eq!(broker.committed_offset("test-requests", &topics.requests), Some(1));
    assert_eq!(broker.committed_offset("test-updates", &topics.updates), Some(1));

    assert_eq!(counters.errors("invalid_input"), 3);
    assert_eq!(counters.processed(), 0);
}

#[tokio::test]
async fn test_successful_messages_are_committed() {
    let harness = Harness::start(RecordingHandler::default()).await;
    let topics = harness.topics.clone();
    harness.broker.publish(&topics.orders, upsert_payload()).unwrap();
    harness.broker.publish(&topics.requests, request_payload()).unwrap();
    harness.broker.publish(&topics.updates, updates_payload()).unwrap();

    let (broker, handler, counters) = harness.settle(3).await;

    let mut calls = handler.calls();
    calls.sort();
    assert_eq!(calls, vec!["request:r-1", "updates:o-1", "upsert:o-1"]);
    assert_eq!(broker.committed_offset("test-orders", &topics.orders), Some(1));
    assert_eq!(broker.committed_offset("test-requests", &topics.requests), Some(1));
    assert_eq!(broker.committed_offset("test-updates", &topics.updates), Some(1));
    assert_eq!(counters.processed(), 3);

    // The pull request was answered
    let responses = broker.messages(&topics.responses);
    assert_eq!(responses.len(), 1);
    let response: OrderTasksResponse = serde_json::from_slice(&responses[0]).unwrap();
    assert_eq!(response.request_id, "r-1");
}

#[tokio::test]
async fn test_handler_failure_withholds_commit_except_for_requests() {
    let harness = Harness::start(RecordingHandler::failing()).await;
    let topics = harness.topics.clone();
    harness.broker.publish(&topics.orders, upsert_payload()).unwrap();
    harness.broker.publish(&topics.requests, request_payload()).unwrap();
    harness.broker.publish(&topics.updates, updates_payload()).unwrap();

    let (broker, handler, counters) = harness.settle(3).await;

    assert_eq!(handler.calls().len(), 3);
    assert_eq!(broker.committed_offset("test-orders", &topics.orders), None);
    assert_eq!(broker.committed_offset("test-updates", &topics.updates), None);
    assert_eq!(broker.committed_offset("test-requests", &topics.requests), Some(1));

    // Nothing to answer with
    assert!(broker.messages(&topics.responses).is_empty());
    assert_eq!(counters.errors("transport"), 3);
    assert_eq!(counters.processed(), 0);
}

#[tokio::test]
async fn test_publish_failure_withholds_commit() {
    let broker = MemoryBroker::new();
    let producer = Arc::new(FailingProducer {
        attempts: AtomicUsize::new(0),
    });
    let harness = Harness::start_with(
        broker,
        RecordingHandler::default(),
        ResponsePublisher::new(producer.clone()),
    )
    .await;
    let topics = harness.topics.clone();
    harness.broker.publish(&topics.requests, request_payload()).unwrap();

    let (broker, handler, counters) = harness.settle(1).await;

    assert_eq!(handler.calls(), vec!["request:r-1"]);
    assert_eq!(producer.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(broker.committed_offset("test-requests", &topics.requests), None);
    assert_eq!(counters.processed(), 0);
    assert_eq!(counters.errors("transport"), 1);
}

#[tokio::test]
async fn test_uncommitted_message_is_redelivered_after_restart() {
    let harness = Harness::start(RecordingHandler::failing()).await;
    let topics = harness.topics.clone();
    harness.broker.publish(&topics.updates, updates_payload()).unwrap();
    let (broker, _, _) = harness.settle(1).await;

    // A healthy instance in the same consumer group picks it up again
    let publisher = ResponsePublisher::new(broker.producer(&topics.responses).await.unwrap());
    let harness = Harness::start_with(broker, RecordingHandler::default(), publisher).await;
    let (broker, handler, _) = harness.settle(1).await;

    assert_eq!(handler.calls(), vec!["updates:o-1"]);
    assert_eq!(broker.committed_offset("test-updates", &topics.updates), Some(1));
}

#[tokio::test]
async fn test_cancellation_returns_ok() {
    let harness = Harness::start(RecordingHandler::default()).await;
    harness.shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), harness.running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_fetch_error_stops_all_loops_but_not_caller() {
    let broker = MemoryBroker::new();
    let topics = Topics::default();
    let healthy = Consumers::subscribe(&broker, &topics, PREFIX).await.unwrap();
    let consumers = Consumers {
        orders: Subscription {
            topic: topics.orders.clone(),
            consumer: Box::new(BrokenConsumer),
        },
        ..healthy
    };

    let manager = IngestionManager::new(
        consumers,
        Arc::new(RecordingHandler::default()),
        ResponsePublisher::new(broker.producer(&topics.responses).await.unwrap()),
        Counters::install().1,
    );

    let shutdown = Shutdown::new();
    let result = tokio::time::timeout(Duration::from_secs(5), manager.run(&shutdown))
        .await
        .unwrap();

    assert!(matches!(result, Err(IngestError::Fetch { ref topic, .. }) if topic == "orders.tasks"));
    assert!(!shutdown.is_cancelled());
}
