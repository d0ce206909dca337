//! Command-line surface and configuration layering
//!
//! Precedence: built-in defaults < TOML file < environment < flags.
//! clap resolves the last two, so anything it hands back wins over the file.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use coursenet_core::config::{GatewayConfig, NotifierKind};
use coursenet_core::process::ExitPolicy;
use coursenet_core::CacheKey;
use std::path::PathBuf;

/// Settings that can be given on the command line or through the environment
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Address to bind
    #[arg(long, env = "COURSENET_HOST", global = true)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT", global = true)]
    pub port: Option<u16>,

    /// Key-value store URL
    #[arg(long, env = "REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Interpreter for worker scripts
    #[arg(long, env = "COURSENET_INTERPRETER", global = true)]
    pub interpreter: Option<String>,

    /// Directory containing the worker scripts
    #[arg(long, env = "COURSENET_SCRIPTS_DIR", global = true)]
    pub scripts_dir: Option<PathBuf>,

    /// Maintenance trigger, e.g. "sun 03:00"
    #[arg(long, env = "COURSENET_SCHEDULE", global = true)]
    pub schedule: Option<String>,

    /// Treat a non-zero worker exit as failure even with empty stderr
    #[arg(long, env = "COURSENET_STRICT_EXIT", global = true)]
    pub strict_exit: bool,

    /// Mail error reports to this address through sendmail
    #[arg(long, env = "COURSENET_NOTIFY_TO", global = true)]
    pub notify_to: Option<String>,
}

impl Overrides {
    pub fn apply(self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = self.redis_url {
            config.store.url = url;
        }
        if let Some(interpreter) = self.interpreter {
            config.compute.interpreter = interpreter;
        }
        if let Some(dir) = self.scripts_dir {
            config.compute.scripts_dir = dir;
        }
        if let Some(schedule) = self.schedule {
            config.maintenance.schedule = schedule;
        }
        if self.strict_exit {
            config.compute.exit_policy = ExitPolicy::Strict;
        }
        if let Some(to) = self.notify_to {
            config.notify.kind = NotifierKind::Sendmail;
            config.notify.to = to;
        }
    }
}

/// Load the optional TOML file, apply overrides, validate
pub fn load_config(path: Option<&PathBuf>, overrides: Overrides) -> Result<GatewayConfig> {
    let mut config = match path {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

/// Cached resource addressed the same way as the HTTP routes
#[derive(Debug, Subcommand)]
pub enum Resource {
    /// Navigation tree
    Nav,
    /// Coursebook tree node
    Epfl {
        level: Option<String>,
        program: Option<String>,
        specialization: Option<String>,
    },
    /// Course details
    Course { slug: String },
}

impl Resource {
    pub fn key(&self) -> CacheKey {
        match self {
            Resource::Nav => CacheKey::nav(),
            Resource::Epfl {
                level,
                program,
                specialization,
            } => CacheKey::epfl(
                level.as_deref(),
                program.as_deref(),
                specialization.as_deref(),
            ),
            Resource::Course { slug } => CacheKey::course(slug),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_defaults() {
        let mut config = GatewayConfig::default();
        Overrides {
            port: Some(8080),
            redis_url: Some("redis://cache:6380".to_string()),
            strict_exit: true,
            notify_to: Some("ops@example.org".to_string()),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.store.url, "redis://cache:6380");
        assert_eq!(config.compute.exit_policy, ExitPolicy::Strict);
        assert_eq!(config.notify.kind, NotifierKind::Sendmail);
        assert_eq!(config.notify.to, "ops@example.org");
    }

    #[test]
    fn test_load_config_rejects_bad_schedule() {
        let overrides = Overrides {
            schedule: Some("every day".to_string()),
            ..Default::default()
        };
        assert!(load_config(None, overrides).is_err());
    }

    #[test]
    fn test_resource_keys() {
        assert_eq!(Resource::Nav.key().as_str(), "nav");
        assert_eq!(
            Resource::Epfl {
                level: Some("master".to_string()),
                program: None,
                specialization: None,
            }
            .key()
            .as_str(),
            "epfl_master"
        );
        assert_eq!(
            Resource::Course {
                slug: "cs-101".to_string()
            }
            .key()
            .as_str(),
            "course_cs-101"
        );
    }
}
