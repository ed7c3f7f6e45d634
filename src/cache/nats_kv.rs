//! NATS JetStream key-value backend.
//!
//! JetStream KV expires entries per bucket, not per key, so the bucket is
//! created with `max_age` set to the configured TTL and the `ttl` passed to
//! [`KvBackend::put`] is ignored.
//!
//! KV keys may not contain `:`, so it is stored as `.` and mapped back on
//! listing.

use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use tracing::info;

use super::{CacheError, KvBackend};

pub struct NatsKv {
    store: kv::Store,
}

impl NatsKv {
    /// Connect and open the bucket, creating it when missing
    pub async fn connect(url: &str, bucket: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let context = jetstream::new(client);

        let store = match context.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => {
                info!(bucket, "Creating KV bucket");
                context
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        max_age: ttl,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| CacheError::Backend(e.to_string()))?
            }
        };

        Ok(Self { store })
    }
}

fn encode_key(key: &str) -> String {
    key.replace(':', ".")
}

fn decode_key(key: &str) -> String {
    key.replace('.', ":")
}

#[async_trait]
impl KvBackend for NatsKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self
            .store
            .get(encode_key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(value.map(|b| b.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        self.store
            .put(encode_key(key), Bytes::from(value))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store
            .delete(encode_key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let keys: Vec<String> = self
            .store
            .keys()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let prefix = encode_key(prefix);
        Ok(keys
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| decode_key(&k))
            .collect())
    }
}
