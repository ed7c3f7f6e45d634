//! Command-line interface for taskreg.
//!
//! Provides commands for running the ingestion service, querying and
//! updating orders directly, publishing raw events, and the teammate
//! lookup.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, JsonlBroker, MemoryBroker, Producer};
use crate::cache::{GroupCache, KvBackend, MemoryKv, ReferenceCache};
use crate::config::{self, BrokerBackend, CacheBackend, ResolvedConfig};
use crate::core::{RegistryService, TeammateDirectory};
use crate::domain::{OrderTasksRequest, ReferenceCategory};
use crate::ingest::{
    install_prometheus, Consumers, IngestionManager, Metrics, ResponsePublisher, Shutdown, Stream,
};
use crate::store::SqliteStore;

pub mod teammates;

/// taskreg - Event-driven order/task registry
#[derive(Parser, Debug)]
#[command(name = "taskreg")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ingestion loops until Ctrl-C
    Serve,

    /// List the groups of an order
    Groups {
        /// Order ID (UUID)
        order_id: String,
    },

    /// Show the tasks of one group
    Tasks {
        /// Order ID (UUID)
        order_id: String,

        /// Group ID (UUID)
        group_id: String,
    },

    /// Change the status of a task
    SetStatus {
        /// Order ID (UUID)
        order_id: String,

        /// Task ID
        task_id: String,

        /// New status (New, InProgress, Review, Done, Cancelled)
        status: String,
    },

    /// Print every task of an order as a response payload
    Order {
        /// Order ID (UUID)
        order_id: String,
    },

    /// Publish a raw JSON event onto an inbound topic
    Publish {
        /// Target stream
        #[arg(value_enum)]
        stream: PublishStream,

        /// Payload file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show (or extend) a reference list
    References {
        /// games, genres, languages or apps
        category: String,

        /// Add this name to the list first
        #[arg(long)]
        add: Option<String>,
    },

    /// Teammate search and registration
    Teammates {
        #[command(subcommand)]
        command: teammates::TeammateCommands,
    },

    /// Show current configuration
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PublishStream {
    Orders,
    Requests,
    Updates,
}

impl From<PublishStream> for Stream {
    fn from(stream: PublishStream) -> Self {
        match stream {
            PublishStream::Orders => Stream::Orders,
            PublishStream::Requests => Stream::Requests,
            PublishStream::Updates => Stream::Updates,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;

        match self.command {
            Commands::Serve => serve(cfg).await,
            Commands::Groups { order_id } => list_groups(cfg, &order_id).await,
            Commands::Tasks { order_id, group_id } => list_tasks(cfg, &order_id, &group_id).await,
            Commands::SetStatus {
                order_id,
                task_id,
                status,
            } => set_status(cfg, &order_id, &task_id, &status).await,
            Commands::Order { order_id } => show_order(cfg, &order_id).await,
            Commands::Publish { stream, input } => publish(cfg, stream.into(), input).await,
            Commands::References { category, add } => references(cfg, &category, add).await,
            Commands::Teammates { command } => teammates::execute(cfg, command).await,
            Commands::Config => show_config(cfg),
        }
    }
}

// ============================================================================
// Component wiring
// ============================================================================

pub(crate) fn open_store(cfg: &ResolvedConfig) -> Result<Arc<SqliteStore>> {
    if let Some(parent) = cfg.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store = SqliteStore::open(&cfg.database)
        .with_context(|| format!("Failed to open database: {}", cfg.database.display()))?;
    Ok(Arc::new(store))
}

/// What a key-value backend is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KvPurpose {
    Tasks,
    References,
}

/// Bucket name and TTL for a purpose; each cache gets its own bucket
fn kv_bucket(cfg: &ResolvedConfig, purpose: KvPurpose) -> (&str, Duration) {
    match purpose {
        KvPurpose::Tasks => (&cfg.cache.bucket, cfg.cache.ttl()),
        KvPurpose::References => (&cfg.cache.reference_bucket, cfg.cache.reference_ttl()),
    }
}

pub(crate) async fn open_kv(cfg: &ResolvedConfig, purpose: KvPurpose) -> Result<Arc<dyn KvBackend>> {
    let (bucket, ttl) = kv_bucket(cfg, purpose);
    debug!(?purpose, bucket, ttl_secs = ttl.as_secs(), "Opening cache backend");

    match cfg.cache.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryKv::new())),
        #[cfg(feature = "nats")]
        CacheBackend::Nats => {
            let kv = crate::cache::NatsKv::connect(&cfg.cache.url, bucket, ttl)
                .await
                .with_context(|| format!("Failed to open NATS KV bucket {bucket}"))?;
            Ok(Arc::new(kv))
        }
        #[cfg(not(feature = "nats"))]
        CacheBackend::Nats => anyhow::bail!("cache backend 'nats' requires the `nats` feature"),
    }
}

async fn open_broker(cfg: &ResolvedConfig) -> Result<Arc<dyn Broker>> {
    match cfg.broker.backend {
        BrokerBackend::Memory => Ok(Arc::new(MemoryBroker::new())),
        BrokerBackend::Jsonl => {
            let broker = JsonlBroker::open(&cfg.broker.dir)
                .await
                .with_context(|| format!("Failed to open broker dir: {}", cfg.broker.dir.display()))?
                .with_poll_interval(cfg.broker.poll_interval());
            Ok(Arc::new(broker))
        }
        #[cfg(feature = "nats")]
        BrokerBackend::Nats => {
            let broker = crate::broker::NatsBroker::connect(&cfg.broker.url)
                .await
                .context("Failed to connect to NATS")?;
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "nats"))]
        BrokerBackend::Nats => anyhow::bail!("broker backend 'nats' requires the `nats` feature"),
    }
}

async fn registry_service(cfg: &ResolvedConfig) -> Result<RegistryService> {
    let store = open_store(cfg)?;
    let cache = GroupCache::new(
        open_kv(cfg, KvPurpose::Tasks).await?,
        cfg.cache.prefix.clone(),
        cfg.cache.ttl(),
    );
    Ok(RegistryService::new(store, Arc::new(cache)))
}

pub(crate) async fn teammate_directory(cfg: &ResolvedConfig) -> Result<TeammateDirectory> {
    let store = open_store(cfg)?;
    let references = ReferenceCache::new(
        open_kv(cfg, KvPurpose::References).await?,
        cfg.cache.reference_ttl(),
    );
    Ok(TeammateDirectory::new(store, references))
}

/// Producer for the search filter topic; `None` if the broker is unavailable
pub(crate) async fn filter_producer(cfg: &ResolvedConfig) -> Option<Arc<dyn Producer>> {
    let opened = match open_broker(cfg).await {
        Ok(broker) => broker.producer(&cfg.topics.filter_data).await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };

    match opened {
        Ok(producer) => Some(producer),
        Err(e) => {
            warn!(error = %e, topic = %cfg.topics.filter_data, "Search filters will not be published");
            None
        }
    }
}

/// Messages on the memory broker die with the process
fn ensure_durable_broker(backend: BrokerBackend) -> Result<()> {
    if backend == BrokerBackend::Memory {
        anyhow::bail!("broker backend 'memory' does not outlive this command; configure jsonl or nats to publish");
    }
    Ok(())
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn serve(cfg: &ResolvedConfig) -> Result<()> {
    if let Some(listen) = cfg.metrics_listen {
        install_prometheus(listen).context("Failed to start metrics exporter")?;
    }

    let service = Arc::new(registry_service(cfg).await?);
    let broker = open_broker(cfg).await?;

    let consumers = Consumers::subscribe(broker.as_ref(), &cfg.topics, &cfg.broker.group_prefix)
        .await
        .context("Failed to subscribe to inbound topics")?;
    let publisher = ResponsePublisher::new(
        broker
            .producer(&cfg.topics.responses)
            .await
            .context("Failed to open response topic")?,
    );
    let manager = IngestionManager::new(consumers, service, publisher, Arc::new(Metrics::new()));

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
        }
        trigger.cancel();
    });

    info!(
        service = %cfg.service_name,
        backend = ?cfg.broker.backend,
        group_prefix = %cfg.broker.group_prefix,
        "Serving"
    );
    manager.run(&shutdown).await.context("Ingestion failed")?;
    Ok(())
}

async fn list_groups(cfg: &ResolvedConfig, order_id: &str) -> Result<()> {
    let groups = registry_service(cfg).await?.list_groups(order_id).await?;

    if groups.is_empty() {
        println!("No groups found for order {}", order_id);
        return Ok(());
    }

    println!("{:<38} NAME", "GROUP ID");
    println!("{}", "-".repeat(60));
    for group in groups {
        println!("{:<38} {}", group.id, group.name);
    }
    Ok(())
}

async fn list_tasks(cfg: &ResolvedConfig, order_id: &str, group_id: &str) -> Result<()> {
    let snapshot = registry_service(cfg)
        .await?
        .list_group_tasks(order_id, group_id)
        .await?;

    if snapshot.group_name.is_empty() && snapshot.tasks.is_empty() {
        println!("Group {} not found in order {}", group_id, order_id);
        return Ok(());
    }

    println!("Group: {}", snapshot.group_name);
    println!();
    println!("{:<12} {:<12} DEADLINE", "TASK", "STATUS");
    println!("{}", "-".repeat(40));
    for task in snapshot.tasks {
        let deadline = task
            .deadline
            .map(|d| d.format(crate::domain::order::DEADLINE_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<12} {:<12} {}", task.id, task.status, deadline);
    }
    Ok(())
}

async fn set_status(cfg: &ResolvedConfig, order_id: &str, task_id: &str, status: &str) -> Result<()> {
    registry_service(cfg)
        .await?
        .update_task_status(order_id, task_id, status)
        .await?;
    println!("Task {} is now {}", task_id, status);
    Ok(())
}

async fn show_order(cfg: &ResolvedConfig, order_id: &str) -> Result<()> {
    let request = OrderTasksRequest {
        request_id: Uuid::new_v4().to_string(),
        order_id: order_id.to_string(),
    };
    let response = registry_service(cfg)
        .await?
        .build_order_tasks_response(&request)
        .await?;
    print_json(&response)
}

async fn publish(cfg: &ResolvedConfig, stream: Stream, input: Option<PathBuf>) -> Result<()> {
    ensure_durable_broker(cfg.broker.backend)?;

    let payload = match input {
        Some(path) => std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    // Reject obvious mistakes before they become poison messages
    serde_json::from_slice::<serde_json::Value>(&payload).context("Payload is not valid JSON")?;

    let topic = stream.topic(&cfg.topics);
    let producer = open_broker(cfg).await?.producer(topic).await?;
    producer.send(&payload).await?;

    println!("Published {} bytes to {}", payload.len(), topic);
    Ok(())
}

async fn references(cfg: &ResolvedConfig, category: &str, add: Option<String>) -> Result<()> {
    let category: ReferenceCategory = category.parse()?;
    let directory = teammate_directory(cfg).await?;

    if let Some(name) = add {
        let id = directory.add_reference(category, &name).await?;
        println!("Added {} #{}: {}", category, id, name);
    }

    let items = directory.references(category).await?;
    if items.is_empty() {
        println!("No {} yet", category);
        return Ok(());
    }
    for item in items {
        println!("{:>6}  {}", item.id, item.name);
    }
    Ok(())
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("taskreg configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    print!("{}", serde_yaml::to_string(cfg)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(yaml: &str) -> ResolvedConfig {
        let file: config::ConfigFile = serde_yaml::from_str(yaml).unwrap();
        config::resolve(
            Some((PathBuf::from("/project/.taskreg/config.yaml"), file)),
            config::EnvOverrides::default(),
            PathBuf::from("/unused"),
        )
    }

    #[test]
    fn test_reference_cache_gets_its_own_bucket_and_ttl() {
        let cfg = resolved(
            r#"
cache:
  backend: nats
  bucket: registry
  ttl_seconds: 60
  reference_ttl_seconds: 86400
"#,
        );

        let (tasks_bucket, tasks_ttl) = kv_bucket(&cfg, KvPurpose::Tasks);
        let (refs_bucket, refs_ttl) = kv_bucket(&cfg, KvPurpose::References);

        assert_eq!(tasks_bucket, "registry");
        assert_eq!(tasks_ttl, Duration::from_secs(60));
        assert_eq!(refs_bucket, "registry-refs");
        assert_eq!(refs_ttl, Duration::from_secs(86400));
    }

    #[test]
    fn test_publish_refuses_memory_broker() {
        assert!(ensure_durable_broker(BrokerBackend::Memory).is_err());
        assert!(ensure_durable_broker(BrokerBackend::Jsonl).is_ok());
        assert!(ensure_durable_broker(BrokerBackend::Nats).is_ok());
    }

    #[tokio::test]
    async fn test_publish_with_memory_broker_fails_before_reading_input() {
        let cfg = resolved("broker:\n  backend: memory\n");
        let missing = PathBuf::from("/nonexistent/payload.json");

        let err = publish(&cfg, Stream::Orders, Some(missing)).await.unwrap_err();
        assert!(err.to_string().contains("memory"));
    }
}
