//! SOS content cache daemon
//!
//! Hosts a [`ContentCacheController`], rebuilds it on a schedule and
//! persists it on shutdown.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sos_cache::{
    CacheFeeder, ContentCacheController, DatasourceCacheUpdate, EmptyFeeder, JsonFileFeeder,
    SnapshotFile,
};
use sos_common::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sos-cached")]
#[command(about = "SOS capabilities content cache daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/sos/cache.toml", env = "SOS_CACHE_CONFIG")]
    config: PathBuf,

    /// Base directory holding the cache snapshot
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// JSON document used to rebuild the cache
    #[arg(long)]
    datasource: Option<PathBuf>,

    /// Minutes between scheduled rebuilds (0 disables them)
    #[arg(long)]
    update_interval_mins: Option<u64>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host the controller until interrupted (default)
    Run,
    /// Print a snapshot file as JSON without consuming it
    Inspect {
        /// Snapshot file, defaults to the configured one
        path: Option<PathBuf>,
    },
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Merge CLI args with the config file (CLI takes precedence)
fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(base_path) = &args.base_path {
        config.service.base_path.clone_from(base_path);
    }
    if let Some(datasource) = &args.datasource {
        config.service.datasource = Some(datasource.clone());
    }
    if let Some(mins) = args.update_interval_mins {
        config.cache.update_interval_mins = mins;
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_controller(config: &Config) -> Result<Arc<ContentCacheController>> {
    let feeder: Arc<dyn CacheFeeder> = match &config.service.datasource {
        Some(path) => {
            let feeder = JsonFileFeeder::new(path);
            info!("Datasource: {}", feeder.path().display());
            Arc::new(feeder)
        }
        None => {
            warn!("No datasource configured; complete updates produce an empty cache");
            Arc::new(EmptyFeeder)
        }
    };
    let controller =
        ContentCacheController::new(config, Arc::new(DatasourceCacheUpdate::new(feeder)))?;
    Ok(Arc::new(controller))
}

async fn run(config: Config) -> Result<()> {
    info!("Starting SOS content cache daemon");
    info!("Base path: {}", config.service.base_path.display());

    let controller = build_controller(&config)?;
    if !controller.is_initialized() {
        // The rebuild blocks on I/O; keep it off the runtime threads
        let initial = Arc::clone(&controller);
        let result = tokio::task::spawn_blocking(move || initial.update_from_datasource()).await?;
        if let Err(e) = result {
            error!("Initial content cache update failed: {}", e);
        }
    }

    controller.start_scheduler()?;
    let cache = controller.get_cache();
    info!(
        "Content cache ready: {} offerings, {} procedures",
        cache.offerings().len(),
        cache.procedures().len()
    );

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");

    let closing = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || closing.cleanup()).await?;

    let stats = controller.stats();
    info!(
        "Complete updates: {}, partial updates: {}, snapshot stores: {}",
        stats.complete_updates.load(std::sync::atomic::Ordering::Relaxed),
        stats.partial_updates.load(std::sync::atomic::Ordering::Relaxed),
        stats.snapshot_stores.load(std::sync::atomic::Ordering::Relaxed)
    );
    info!("SOS content cache daemon shut down gracefully");
    Ok(())
}

fn inspect(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let file = SnapshotFile::new(path.unwrap_or_else(|| config.cache_file_path()));
    let cache = file
        .load()
        .with_context(|| format!("failed to decode {}", file.path().display()))?
        .with_context(|| format!("no snapshot at {}", file.path().display()))?;
    println!("{}", serde_json::to_string_pretty(&cache)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = apply_overrides(load_config(&args.config)?, &args);
    config.validate()?;

    init_logging(&config);

    match args.command {
        Some(Command::Inspect { path }) => inspect(&config, path),
        Some(Command::Run) | None => run(config).await,
    }
}
