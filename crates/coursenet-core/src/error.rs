//! Error types for coursenet-core
//!
//! One error hierarchy for the store, the process boundary and the notifier.
//! A cache miss is not an error and never shows up here.

use std::time::Duration;
use thiserror::Error;

/// Core error type for coursenet operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // Store Errors
    // ===================
    #[error("Failed to connect to key-value store at {url}")]
    StoreConnect {
        url: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("Failed to read key {key} from key-value store")]
    StoreRead {
        key: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("Corrupt cached payload under {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    // ===================
    // Process Errors
    // ===================
    #[error("Failed to spawn {program}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while talking to {program}")]
    ProcessIo {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed: {stderr}")]
    Computation { program: String, stderr: String },

    #[error("{program} produced invalid JSON output")]
    OutputParse {
        program: String,
        #[source]
        source: serde_json::Error,
    },

    // ===================
    // Deadlines
    // ===================
    #[error("Operation timed out after {timeout:?}: {operation}")]
    Timeout { operation: String, timeout: Duration },

    // ===================
    // Notification
    // ===================
    #[error("Failed to deliver notification: {message}")]
    Notify { message: String },

    // ===================
    // Config Errors
    // ===================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

impl CoreError {
    /// Actionable hint for operators, when one exists
    pub fn suggestion(&self) -> Option<String> {
        match self {
            CoreError::StoreConnect { url, .. } => {
                Some(format!("Check that the store is reachable: redis-cli -u {} ping", url))
            }
            CoreError::Decode { key, .. } => Some(format!(
                "Inspect the payload: redis-cli get {} | jq . (re-run `coursenet populate` to rebuild)",
                key
            )),
            CoreError::ProcessSpawn { program, .. } => {
                Some(format!("Check that {} is installed and on PATH", program))
            }
            CoreError::InvalidConfig { .. } => {
                Some("Review the TOML file passed with --config".to_string())
            }
            _ => None,
        }
    }

    /// True for failures reported by an external computation itself
    pub fn is_computation(&self) -> bool {
        matches!(self, CoreError::Computation { .. })
    }
}
