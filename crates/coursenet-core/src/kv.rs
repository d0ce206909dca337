//! Key-value store client
//!
//! The gateway only ever issues single-key reads. Population is done by the
//! maintenance job's external process, so there is no write path here.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

/// Read-only access to the store that owns every cached resource
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Raw bytes stored under `key`, or `None` if the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Redis-backed store
///
/// `ConnectionManager` multiplexes one connection and reconnects on failure;
/// clones share it, so concurrent lookups need no extra locking.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    url: String,
}

impl RedisStore {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|source| CoreError::StoreConnect {
            url: url.to_string(),
            source,
        })?;

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|source| CoreError::StoreConnect {
                url: url.to_string(),
                source,
            })?;

        info!(url = %url, "Connected to key-value store");

        Ok(Self {
            connection,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut connection = self.connection.clone();
        let value: Option<Vec<u8>> =
            connection
                .get(key)
                .await
                .map_err(|source| CoreError::StoreRead {
                    key: key.to_string(),
                    source,
                })?;

        debug!(key = %key, found = value.is_some(), "Store lookup");
        Ok(value)
    }
}

/// In-process store
///
/// Used by tests and by embedders that already hold the dataset in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Seed an entry with a JSON-serialized value
    pub fn insert_json<T: serde::Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let key = key.into();
        let bytes = serde_json::to_vec(value).map_err(|source| CoreError::Decode {
            key: key.clone(),
            source,
        })?;
        self.entries.insert(key, bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }
}
