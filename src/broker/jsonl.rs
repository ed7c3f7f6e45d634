//! File-backed broker for single-host deployments.
//!
//! Layout under the broker directory:
//! - `<topic>.jsonl`: one record per line; a record's offset is its line index
//! - `offsets/<group>@<topic>`: next unconsumed offset of a consumer group
//!
//! Appends take an exclusive `fs2` lock so several processes can produce to
//! the same topic. Consumers poll the file for new lines.

use std::fs::OpenOptions;
use std::io::{SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::debug;

use super::{Broker, BrokerError, Consumer, Message, Producer};
use crate::ingest::Shutdown;

/// Default interval between polls of an exhausted topic file
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One line of a topic file
#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
    ts: DateTime<Utc>,
    payload: String,
}

#[derive(Debug, Clone)]
pub struct JsonlBroker {
    dir: PathBuf,
    poll_interval: Duration,
}

impl JsonlBroker {
    /// Open a broker directory, creating it when missing
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, BrokerError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("offsets")).await?;
        Ok(Self {
            dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn topic_path(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{topic}.jsonl"))
    }

    fn offset_path(&self, group: &str, topic: &str) -> PathBuf {
        self.dir.join("offsets").join(format!("{group}@{topic}"))
    }

    /// Append a payload under the file lock.
    ///
    /// Records are JSON lines, so payloads must be UTF-8; anything else is
    /// refused rather than rewritten.
    pub async fn append(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let payload = std::str::from_utf8(payload).map_err(|e| BrokerError::InvalidPayload {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        let record = LogRecord {
            ts: Utc::now(),
            payload: payload.to_string(),
        };
        let line = serde_json::to_string(&record)?;
        let path = self.topic_path(topic);

        tokio::task::spawn_blocking(move || append_line(&path, &line))
            .await
            .map_err(|e| BrokerError::Backend(e.to_string()))?
    }

    /// Next unconsumed offset recorded for the group (0 if none)
    pub async fn committed_offset(&self, group: &str, topic: &str) -> Result<u64, BrokerError> {
        read_offset(&self.offset_path(group, topic)).await
    }
}

fn append_line(path: &Path, line: &str) -> Result<(), BrokerError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    file.lock_exclusive()?;
    writeln!(file, "{}", line)?;
    file.flush()?;

    // Lock is released when file is dropped
    Ok(())
}

async fn read_offset(path: &Path) -> Result<u64, BrokerError> {
    match fs::read_to_string(path).await {
        Ok(raw) => raw.trim().parse().map_err(|_| BrokerError::Corrupt {
            topic: path.display().to_string(),
            offset: 0,
            reason: format!("unreadable committed offset {raw:?}"),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Broker for JsonlBroker {
    async fn consumer(&self, topic: &str, group: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        let offset_path = self.offset_path(group, topic);
        let committed = read_offset(&offset_path).await?;

        let mut consumer = JsonlConsumer {
            topic: topic.to_string(),
            path: self.topic_path(topic),
            offset_path,
            poll_interval: self.poll_interval,
            next_offset: 0,
            byte_pos: 0,
            committed,
        };
        consumer.skip_to(committed).await?;

        debug!(topic, group, offset = committed, "JSONL consumer positioned");
        Ok(Box::new(consumer))
    }

    async fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>, BrokerError> {
        Ok(Arc::new(JsonlProducer {
            broker: self.clone(),
            topic: topic.to_string(),
        }))
    }
}

struct JsonlConsumer {
    topic: String,
    path: PathBuf,
    offset_path: PathBuf,
    poll_interval: Duration,
    /// Offset of the next line to read
    next_offset: u64,
    /// Byte position of that line
    byte_pos: u64,
    committed: u64,
}

impl JsonlConsumer {
    /// Read the complete line at `byte_pos`, if one has been written
    async fn read_line(&self) -> Result<Option<String>, BrokerError> {
        let mut file = match fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.byte_pos)).await?;

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        // A line without its newline is still being written
        if line.ends_with('\n') {
            Ok(Some(line))
        } else {
            Ok(None)
        }
    }

    async fn skip_to(&mut self, offset: u64) -> Result<(), BrokerError> {
        while self.next_offset < offset {
            match self.read_line().await? {
                Some(line) => {
                    self.byte_pos += line.len() as u64;
                    self.next_offset += 1;
                }
                // Committed past the end of the log; resume at the end
                None => break,
            }
        }
        Ok(())
    }

    fn decode(&self, line: &str) -> Result<Message, BrokerError> {
        let record: LogRecord =
            serde_json::from_str(line.trim_end()).map_err(|e| BrokerError::Corrupt {
                topic: self.topic.clone(),
                offset: self.next_offset,
                reason: e.to_string(),
            })?;

        Ok(Message {
            topic: self.topic.clone(),
            offset: self.next_offset,
            payload: record.payload.into_bytes(),
        })
    }
}

#[async_trait]
impl Consumer for JsonlConsumer {
    async fn fetch(&mut self, shutdown: &Shutdown) -> Result<Option<Message>, BrokerError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }

            if let Some(line) = self.read_line().await? {
                let message = self.decode(&line)?;
                self.byte_pos += line.len() as u64;
                self.next_offset += 1;
                return Ok(Some(message));
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn commit(&mut self, message: &Message) -> Result<(), BrokerError> {
        let next = message.offset + 1;
        if next <= self.committed {
            return Ok(());
        }

        // Write-then-rename keeps the offset file whole across crashes
        let mut tmp = self.offset_path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, next.to_string()).await?;
        fs::rename(&tmp, &self.offset_path).await?;

        self.committed = next;
        Ok(())
    }
}

struct JsonlProducer {
    broker: JsonlBroker,
    topic: String,
}

#[async_trait]
impl Producer for JsonlProducer {
    async fn send(&self, payload: &[u8]) -> Result<(), BrokerError> {
        self.broker.append(&self.topic, payload).await
    }
}
