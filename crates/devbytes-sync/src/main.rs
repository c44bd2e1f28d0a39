//! DevBytes sync - keeps the offline DevBytes catalog fresh.
//!
//! Runs the daily refresh job in the background, or performs one-shot
//! commands against the local cache.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use devbytes_core::jobs::{ConflictPolicy, JobRegistry, JobRunner, WorkResult};
use devbytes_core::remote::DevBytesClient;
use devbytes_core::scheduler::{register_refresh_worker, run_refresh_now};
use devbytes_core::utils::{format_date, truncate_string};
use devbytes_core::{ensure_scheduled, Config, VideoStore, VideosRepository, REFRESH_WORK_NAME};

/// Prefix of the daily log files under the log directory
const LOG_FILE_PREFIX: &str = "devbytes-sync.log";

/// Width of the title column in `list` output
const TITLE_WIDTH: usize = 72;

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and to a daily rolling file. The returned guard flushes
/// the file writer and must live until the process exits.
fn init_tracing(config: &Config) -> Result<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = config.log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load().context("Failed to load configuration")?;
    let _guard = init_tracing(&config)?;

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None | Some("run") => run(&config).await,
        Some("refresh") => refresh_once(&config).await,
        Some("status") => status(&config).await,
        Some("list") => list(&config).await,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Usage: devbytes-sync [run|refresh|status|list]");
            std::process::exit(2);
        }
    }
}

async fn open_repository(config: &Config) -> Result<(VideoStore, VideosRepository)> {
    let db_path = config.database_path()?;
    let store = VideoStore::open(&db_path)
        .await
        .with_context(|| format!("Failed to open cache at {}", db_path.display()))?;
    let client = DevBytesClient::from_config(config)?;
    let repository = VideosRepository::new(store.clone(), Arc::new(client));
    Ok((store, repository))
}

async fn open_registry(config: &Config) -> Result<JobRegistry> {
    let jobs_path = config.jobs_path()?;
    JobRegistry::open(&jobs_path)
        .await
        .with_context(|| format!("Failed to open job registry at {}", jobs_path.display()))
}

/// Schedule the refresh job and run it until Ctrl-C.
async fn run(config: &Config) -> Result<()> {
    info!("DevBytes sync starting");

    let (_store, repository) = open_repository(config).await?;
    let registry = open_registry(config).await?;
    ensure_scheduled(&registry, ConflictPolicy::Keep).await?;

    let mut runner = JobRunner::new(registry, config.retry_policy());
    register_refresh_worker(&mut runner, repository);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = runner.start(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    handle.await.context("Job runner panicked")?;

    info!("DevBytes sync shutting down");
    Ok(())
}

/// Run a single refresh outside the schedule.
async fn refresh_once(config: &Config) -> Result<()> {
    let (store, repository) = open_repository(config).await?;

    match run_refresh_now(&repository).await {
        (WorkResult::Success, _) => {
            let count = store.count().await?;
            eprintln!("Refreshed {} videos", count);
            Ok(())
        }
        (outcome, err) => {
            let reason = err.map(|e| e.to_string()).unwrap_or_default();
            anyhow::bail!("Refresh ended with {:?}: {}", outcome, reason)
        }
    }
}

async fn status(config: &Config) -> Result<()> {
    let registry = open_registry(config).await?;
    let db_path = config.database_path()?;
    let store = VideoStore::open(&db_path).await?;

    match registry.get(REFRESH_WORK_NAME).await {
        Some(job) => {
            println!("Job:          {}", job.name);
            println!("State:        {}", job.state);
            println!("Period:       {}s", job.period().as_secs());
            println!("Next run:     {}", job.next_run_at.to_rfc3339());
            println!("Attempt:      {}", job.attempt);
            if let Some(last) = job.last_run_at {
                println!("Last run:     {}", last.to_rfc3339());
            }
            if let Some(outcome) = job.last_outcome {
                println!("Last outcome: {:?}", outcome);
            }
            if let Some(ms) = job.last_duration_ms {
                println!("Last took:    {}ms", ms);
            }
        }
        None => println!("Job:          not scheduled"),
    }
    println!("Cached:       {} videos", store.count().await?);
    println!("Database:     {}", db_path.display());
    Ok(())
}

/// Print the cached catalog.
async fn list(config: &Config) -> Result<()> {
    let (_store, repository) = open_repository(config).await?;
    let videos = repository.videos().next().await.unwrap_or_default();

    if videos.is_empty() {
        eprintln!("Cache is empty. Run `devbytes-sync refresh` first.");
        return Ok(());
    }

    for video in videos {
        println!(
            "{}  {}",
            format_date(&video.updated),
            truncate_string(&video.title, TITLE_WIDTH)
        );
        println!("    {}", video.short_description());
        println!("    {}", video.url);
    }
    Ok(())
}
