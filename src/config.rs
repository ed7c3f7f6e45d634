//! Configuration for taskreg.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TASKREG_HOME, TASKREG_DATABASE)
//! 2. Config file (TASKREG_CONFIG, or .taskreg/config.yaml found upward)
//! 3. Defaults (~/.taskreg)
//!
//! Config file discovery:
//! - TASKREG_CONFIG names the file directly
//! - Otherwise the current directory and its parents are searched for .taskreg/config.yaml
//! - Relative paths in the file resolve against the project root (parent of .taskreg/)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::Topics;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_SERVICE_NAME: &str = "taskreg";
const DEFAULT_TTL_SECONDS: u64 = 300;
const DEFAULT_REFERENCE_TTL_SECONDS: u64 = 3600;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    pub service_name: Option<String>,
    /// SQLite database file (relative to project root)
    pub database: Option<String>,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub topics: Topics,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: BrokerBackend,
    /// Log directory for the jsonl backend (relative to project root)
    pub dir: Option<String>,
    /// Server URL for the nats backend
    pub url: Option<String>,
    pub poll_interval_ms: Option<u64>,
    /// Consumer group prefix; defaults to the service name
    pub group_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    pub url: Option<String>,
    pub bucket: Option<String>,
    /// Bucket for reference lists; defaults to `<bucket>-refs`
    pub reference_bucket: Option<String>,
    pub prefix: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub reference_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus scrape address for `serve`; no exporter when unset
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    Memory,
    #[default]
    Jsonl,
    Nats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Nats,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub service_name: String,
    pub database: PathBuf,
    pub broker: BrokerSettings,
    pub topics: Topics,
    pub cache: CacheSettings,
    /// Prometheus scrape address
    pub metrics_listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerSettings {
    pub backend: BrokerBackend,
    pub dir: PathBuf,
    pub url: String,
    pub poll_interval_ms: u64,
    pub group_prefix: String,
}

impl BrokerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub url: String,
    pub bucket: String,
    pub reference_bucket: String,
    pub prefix: String,
    pub ttl_seconds: u64,
    pub reference_ttl_seconds: u64,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn reference_ttl(&self) -> Duration {
        Duration::from_secs(self.reference_ttl_seconds)
    }
}

/// Environment overrides, read once so resolution stays testable
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl EnvOverrides {
    pub(crate) fn from_env() -> Self {
        Self {
            home: std::env::var_os("TASKREG_HOME").map(PathBuf::from),
            database: std::env::var_os("TASKREG_DATABASE").map(PathBuf::from),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".taskreg").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge file, environment and defaults
pub(crate) fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    env: EnvOverrides,
    default_home: PathBuf,
) -> ResolvedConfig {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), config),
        None => (None, ConfigFile::default()),
    };

    // Project root is the parent of .taskreg/ (i.e., grandparent of config.yaml)
    let state_dir = config_file.as_deref().and_then(Path::parent);
    let base_dir = state_dir.and_then(Path::parent);

    let home = env
        .home
        .or_else(|| state_dir.map(Path::to_path_buf))
        .unwrap_or(default_home);
    let rooted = |raw: &str| resolve_path(base_dir.unwrap_or(home.as_path()), raw);

    let database = env
        .database
        .or_else(|| config.database.as_deref().map(rooted))
        .unwrap_or_else(|| home.join("taskreg.db"));

    let service_name = config
        .service_name
        .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

    let broker = BrokerSettings {
        backend: config.broker.backend,
        dir: config
            .broker
            .dir
            .as_deref()
            .map(rooted)
            .unwrap_or_else(|| home.join("broker")),
        url: config
            .broker
            .url
            .unwrap_or_else(|| DEFAULT_NATS_URL.to_string()),
        poll_interval_ms: config
            .broker
            .poll_interval_ms
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        group_prefix: config
            .broker
            .group_prefix
            .unwrap_or_else(|| service_name.clone()),
    };

    let cache = CacheSettings {
        backend: config.cache.backend,
        url: config
            .cache
            .url
            .unwrap_or_else(|| DEFAULT_NATS_URL.to_string()),
        reference_bucket: config
            .cache
            .reference_bucket
            .or_else(|| config.cache.bucket.as_ref().map(|b| format!("{b}-refs")))
            .unwrap_or_else(|| format!("{service_name}-refs")),
        bucket: config
            .cache
            .bucket
            .unwrap_or_else(|| service_name.clone()),
        prefix: config
            .cache
            .prefix
            .unwrap_or_else(|| crate::cache::tasks::DEFAULT_PREFIX.to_string()),
        ttl_seconds: config.cache.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
        reference_ttl_seconds: config
            .cache
            .reference_ttl_seconds
            .unwrap_or(DEFAULT_REFERENCE_TTL_SECONDS),
    };

    ResolvedConfig {
        home,
        config_file,
        service_name,
        database,
        broker,
        topics: config.topics,
        cache,
        metrics_listen: config.metrics.listen,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".taskreg");

    let config_path = match std::env::var_os("TASKREG_CONFIG") {
        Some(explicit) => Some(PathBuf::from(explicit)),
        None => find_config_file(&std::env::current_dir().context("Failed to read current directory")?),
    };

    let file = match config_path {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    Ok(resolve(file, EnvOverrides::from_env(), default_home))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let home = PathBuf::from("/home/user/.taskreg");
        let config = resolve(None, EnvOverrides::default(), home.clone());

        assert_eq!(config.home, home);
        assert_eq!(config.database, home.join("taskreg.db"));
        assert_eq!(config.broker.backend, BrokerBackend::Jsonl);
        assert_eq!(config.broker.dir, home.join("broker"));
        assert_eq!(config.broker.group_prefix, "taskreg");
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.prefix, "tasks");
        assert_eq!(config.cache.bucket, "taskreg");
        assert_eq!(config.cache.reference_bucket, "taskreg-refs");
        assert_eq!(config.cache.reference_ttl(), Duration::from_secs(3600));
        assert!(config.metrics_listen.is_none());
        assert_eq!(config.topics, Topics::default());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let state_dir = temp.path().join(".taskreg");
        std::fs::create_dir_all(&state_dir).unwrap();

        let config_path = state_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1"
service_name: registry
database: data/registry.db
broker:
  backend: memory
  poll_interval_ms: 50
topics:
  orders: staging.orders.tasks
cache:
  ttl_seconds: 30
  reference_ttl_seconds: 900
metrics:
  listen: 127.0.0.1:9464
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.broker.backend, BrokerBackend::Memory);
        assert_eq!(parsed.topics.orders, "staging.orders.tasks");
        // Unlisted topics keep their defaults
        assert_eq!(parsed.topics.updates, "update.tasks.status");

        let config = resolve(
            Some((config_path.clone(), parsed)),
            EnvOverrides::default(),
            PathBuf::from("/unused"),
        );
        assert_eq!(config.home, state_dir);
        assert_eq!(config.database, temp.path().join("data/registry.db"));
        assert_eq!(config.broker.group_prefix, "registry");
        assert_eq!(config.broker.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.cache.bucket, "registry");
        assert_eq!(config.cache.ttl_seconds, 30);
        assert_eq!(config.cache.reference_bucket, "registry-refs");
        assert_eq!(config.cache.reference_ttl(), Duration::from_secs(900));
        assert_eq!(config.metrics_listen, Some("127.0.0.1:9464".parse().unwrap()));
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_win() {
        let env = EnvOverrides {
            home: Some(PathBuf::from("/srv/taskreg")),
            database: Some(PathBuf::from("/var/lib/taskreg.db")),
        };
        let file = ConfigFile {
            database: Some("ignored.db".to_string()),
            ..Default::default()
        };

        let config = resolve(
            Some((PathBuf::from("/project/.taskreg/config.yaml"), file)),
            env,
            PathBuf::from("/unused"),
        );
        assert_eq!(config.home, PathBuf::from("/srv/taskreg"));
        assert_eq!(config.database, PathBuf::from("/var/lib/taskreg.db"));
    }

    #[test]
    fn test_find_config_walks_up() {
        let temp = TempDir::new().unwrap();
        let state_dir = temp.path().join(".taskreg");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("config.yaml"), "{}").unwrap();

        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(state_dir.join("config.yaml")));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
