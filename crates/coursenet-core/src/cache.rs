//! Read-through cache accessor
//!
//! Decodes stored payloads as JSON. A miss is reported to the caller, the
//! cache never populates itself.

use crate::error::{CoreError, Result};
use crate::keys::CacheKey;
use crate::kv::KeyValueStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Default deadline for a single store round-trip
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache-first resolution over a shared key-value store
#[derive(Clone)]
pub struct ReadThroughCache {
    store: Arc<dyn KeyValueStore>,
    lookup_timeout: Duration,
}

impl ReadThroughCache {
    pub fn new(store: Arc<dyn KeyValueStore>, lookup_timeout: Duration) -> Self {
        Self {
            store,
            lookup_timeout,
        }
    }

    pub fn with_defaults(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, DEFAULT_LOOKUP_TIMEOUT)
    }

    /// Look up and decode the resource stored under `key`
    ///
    /// Returns `Ok(None)` on a miss. A stored JSON `null` counts as a miss.
    /// A payload that is not valid JSON is a [`CoreError::Decode`].
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<Value>> {
        let raw = tokio::time::timeout(self.lookup_timeout, self.store.get(key.as_str()))
            .await
            .map_err(|_| CoreError::Timeout {
                operation: format!("store lookup {}", key),
                timeout: self.lookup_timeout,
            })??;

        let Some(bytes) = raw else {
            debug!(key = %key, "Cache miss");
            return Ok(None);
        };

        let value: Value = serde_json::from_slice(&bytes).map_err(|source| {
            error!(key = %key, bytes = bytes.len(), error = %source, "Corrupt cached payload");
            CoreError::Decode {
                key: key.to_string(),
                source,
            }
        })?;

        if is_empty_payload(&value) {
            debug!(key = %key, "Empty cached payload treated as miss");
            return Ok(None);
        }

        debug!(key = %key, "Cache hit");
        Ok(Some(value))
    }
}

/// `null`, `false`, `0` and `""` carry no resource
fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}
