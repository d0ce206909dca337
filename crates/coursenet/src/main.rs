//! coursenet - read-through cache gateway for the EPFL course catalog

mod cli;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coursenet_core::{
    notify, Computations, GatewayConfig, JobOutcome, KeyValueStore, MaintenanceJob,
    ReadThroughCache, RedisStore, Scheduler,
};
use coursenet_web::AppState;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "coursenet",
    version,
    about = "Read-through cache gateway for the EPFL course catalog",
    long_about = "Serves the EPFL coursebook tree and course details from a Redis cache,\n\
                  delegates keyword search and similarity links to worker scripts,\n\
                  and rebuilds the dataset on a weekly schedule.\n\
                  \n\
                  Examples:\n\
                    coursenet                              # Serve on 127.0.0.1:3000\n\
                    coursenet serve --port 8080            # Custom port\n\
                    coursenet serve --populate-on-start    # Rebuild the dataset right away\n\
                    coursenet populate                     # Run the maintenance job once\n\
                    coursenet get course cs-101-algebra    # Print a cached resource\n\
                    coursenet next-run -n 3                # Upcoming maintenance runs\n\
                  \n\
                  Environment Variables:\n\
                    PORT, REDIS_URL, COURSENET_HOST         # Server and store\n\
                    COURSENET_CONFIG                       # TOML config file\n\
                    COURSENET_INTERPRETER                  # Worker interpreter (default: python)\n\
                    COURSENET_SCRIPTS_DIR                  # Worker scripts (default: ./py)\n\
                    COURSENET_SCHEDULE                     # Maintenance trigger (default: sun 03:00)\n\
                    COURSENET_NOTIFY_TO                    # Mail error reports via sendmail\n\
                    RUST_LOG                               # Log filter"
)]
struct Cli {
    #[command(subcommand)]
    mode: Option<Mode>,

    /// TOML configuration file
    #[arg(long, env = "COURSENET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "COURSENET_LOG_JSON", global = true)]
    log_json: bool,

    #[command(flatten)]
    overrides: cli::Overrides,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the HTTP gateway and the maintenance scheduler (default)
    Serve {
        /// Do not schedule the weekly maintenance job
        #[arg(long)]
        no_maintenance: bool,

        /// Run the maintenance job once in the background at startup
        #[arg(long)]
        populate_on_start: bool,
    },
    /// Run the maintenance job once and exit
    Populate,
    /// Print a cached resource
    Get {
        #[command(subcommand)]
        resource: cli::Resource,
    },
    /// Print upcoming maintenance runs
    NextRun {
        /// Number of runs
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_json);

    let config = cli::load_config(cli.config.as_ref(), cli.overrides)?;

    match cli.mode.unwrap_or(Mode::Serve {
        no_maintenance: false,
        populate_on_start: false,
    }) {
        Mode::Serve {
            no_maintenance,
            populate_on_start,
        } => run_serve(config, no_maintenance, populate_on_start).await,
        Mode::Populate => run_populate(config).await,
        Mode::Get { resource } => run_get(config, resource).await,
        Mode::NextRun { count } => run_next_run(config, count),
    }
}

/// Logs go to stderr so stdout stays free for resources and worker output
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("coursenet=info,coursenet_core=info,coursenet_web=info,tower_http=info")
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_cache(config: &GatewayConfig) -> Result<ReadThroughCache> {
    let store = RedisStore::connect(&config.store.url)
        .await
        .context("Failed to connect to key-value store")?;
    let store: Arc<dyn KeyValueStore> = Arc::new(store);

    Ok(ReadThroughCache::new(store, config.store.lookup_timeout()))
}

fn maintenance_job(config: &GatewayConfig) -> MaintenanceJob {
    MaintenanceJob::from_config(config, notify::from_config(&config.notify))
}

async fn run_serve(config: GatewayConfig, no_maintenance: bool, populate_on_start: bool) -> Result<()> {
    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid host address: {}", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);

    let cache = connect_cache(&config).await?;
    let compute = Computations::new(config.compute.clone());
    let state = Arc::new(AppState::new(cache, compute));

    let job = maintenance_job(&config);

    let scheduler = if no_maintenance || !config.maintenance.enabled {
        warn!("Maintenance scheduler disabled");
        if populate_on_start {
            tokio::spawn(async move {
                let outcome = job.run_isolated().await;
                info!(?outcome, "Startup maintenance run finished");
            });
        }
        None
    } else {
        let trigger = config.maintenance.trigger()?;
        Some(if populate_on_start {
            Scheduler::start_with_initial_run(trigger, job)
        } else {
            Scheduler::start(trigger, job)
        })
    };

    let served = coursenet_web::run(state, addr).await;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }

    served
}

async fn run_populate(config: GatewayConfig) -> Result<()> {
    match maintenance_job(&config).run_isolated().await {
        JobOutcome::Clean => {
            info!("Maintenance run completed cleanly");
            Ok(())
        }
        JobOutcome::Escalated => bail!("Maintenance run reported errors (report sent)"),
        JobOutcome::Failed(reason) => bail!("Maintenance run failed: {}", reason),
    }
}

async fn run_get(config: GatewayConfig, resource: cli::Resource) -> Result<()> {
    let cache = connect_cache(&config).await?;
    let key = resource.key();

    let Some(value) = cache.lookup(&key).await? else {
        bail!("No cached resource under {}", key);
    };

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn run_next_run(config: GatewayConfig, count: usize) -> Result<()> {
    let trigger = config.maintenance.trigger()?;
    println!("Schedule: {}", trigger);
    for run in trigger.upcoming(&chrono::Local::now(), count) {
        println!("  {}", run.format("%a %Y-%m-%d %H:%M %Z"));
    }
    Ok(())
}
