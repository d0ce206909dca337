//! coursenet-core - Core library for coursenet
//!
//! Provides cache key derivation, the key-value store client, the read-through
//! accessor, the process delegate for external computations, and the weekly
//! maintenance scheduler.

pub mod cache;
pub mod compute;
pub mod config;
pub mod error;
pub mod keys;
pub mod kv;
pub mod notify;
pub mod process;
pub mod scheduler;

pub use cache::ReadThroughCache;
pub use compute::{Computations, SearchQuery, SimilarityRequest};
pub use config::GatewayConfig;
pub use error::{CoreError, Result};
pub use keys::CacheKey;
pub use kv::{KeyValueStore, MemoryStore, RedisStore};
pub use notify::{LogNotifier, Notifier, SendmailNotifier};
pub use process::{ExitPolicy, Invocation, ProcessDelegate, ProcessOutput};
pub use scheduler::{JobOutcome, MaintenanceJob, Scheduler, WeeklyTrigger};
