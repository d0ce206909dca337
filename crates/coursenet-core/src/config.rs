//! Gateway configuration
//!
//! Every field has a default, so an empty or partial TOML file is valid.
//! The binary layers CLI flags and environment variables on top.

use crate::error::{CoreError, Result};
use crate::process::ExitPolicy;
use crate::scheduler::WeeklyTrigger;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub compute: ComputeConfig,
    pub maintenance: MaintenanceConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL
    pub url: String,

    /// Deadline for a single lookup
    pub lookup_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            lookup_timeout_secs: 5,
        }
    }
}

impl StoreConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

/// External computation workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Interpreter every worker script is run with
    pub interpreter: String,

    /// Working directory of the workers; scripts are resolved against it
    pub scripts_dir: PathBuf,

    pub search_script: PathBuf,
    pub simlinks_script: PathBuf,

    /// Deadline for a search or similarity process
    pub timeout_secs: u64,

    pub exit_policy: ExitPolicy,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            scripts_dir: PathBuf::from("py"),
            search_script: PathBuf::from("search/query.py"),
            simlinks_script: PathBuf::from("search/simlinks.py"),
            timeout_secs: 30,
            exit_policy: ExitPolicy::StderrOnly,
        }
    }
}

impl ComputeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Weekly dataset rebuild
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,

    /// Trigger such as `sun 03:00` (local time)
    pub schedule: String,

    /// Population script, resolved against `compute.scripts_dir`
    pub population_script: PathBuf,

    pub timeout_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "sun 03:00".to_string(),
            population_script: PathBuf::from("init.py"),
            timeout_secs: 6 * 60 * 60,
        }
    }
}

impl MaintenanceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn trigger(&self) -> Result<WeeklyTrigger> {
        self.schedule.parse()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Error report goes to the log only
    #[default]
    Log,
    /// Error report is mailed through a sendmail-compatible program
    Sendmail,
}

/// Failure escalation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub kind: NotifierKind,
    pub sendmail_program: String,
    pub from: String,
    pub to: String,
    pub subject: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            sendmail_program: "sendmail".to_string(),
            from: "coursenet@localhost".to_string(),
            to: "root@localhost".to_string(),
            subject: "[ERROR] EPFL CourseNet".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::InvalidConfig {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CoreError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Reject settings that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(CoreError::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.compute.interpreter.trim().is_empty() {
            return invalid("compute.interpreter must not be empty");
        }
        if self.store.url.trim().is_empty() {
            return invalid("store.url must not be empty");
        }
        if self.store.lookup_timeout_secs == 0 {
            return invalid("store.lookup_timeout_secs must be greater than zero");
        }
        if self.compute.timeout_secs == 0 {
            return invalid("compute.timeout_secs must be greater than zero");
        }
        if self.maintenance.timeout_secs == 0 {
            return invalid("maintenance.timeout_secs must be greater than zero");
        }
        if self.notify.kind == NotifierKind::Sendmail && self.notify.to.trim().is_empty() {
            return invalid("notify.to must be set for the sendmail notifier");
        }
        self.maintenance.trigger()?;

        Ok(())
    }
}
