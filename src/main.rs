#![forbid(unsafe_code)]

//! `quizforge` server binary.
//!
//! Bootstraps configuration, the `SQLite` store, the session
//! coordinator with its timer-expiry consumer, the retention purge
//! task, and the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use quizforge::clock::{Clock, SystemClock};
use quizforge::config::GlobalConfig;
use quizforge::coordinator::bank::{BankCatalog, BankGenerator};
use quizforge::coordinator::generation_lock::GenerationLocks;
use quizforge::coordinator::session::{spawn_expiry_consumer, SessionCoordinator};
use quizforge::http::server;
use quizforge::persistence::lock_repo::LockRepo;
use quizforge::persistence::session_repo::SessionRepo;
use quizforge::persistence::{db, retention};
use quizforge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "quizforge", about = "Quiz session coordination server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the database path from the config file.
    #[arg(long)]
    db: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("quizforge server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(db_path) = args.db {
        config.db_path = db_path;
    }
    let config = Arc::new(config);
    info!("configuration loaded");

    let db = Arc::new(db::connect(&config.db_path).await?);
    info!("database connected");

    let ct = CancellationToken::new();
    let retention_handle =
        retention::spawn_retention_task(Arc::clone(&db), config.retention_days, ct.clone());
    info!("retention service started");

    let clock = Arc::new(SystemClock);
    reconcile_after_crash(&config, &db, &clock).await;

    let generator = Arc::new(BankGenerator::new(config.content_dir.clone()));
    let catalog = Arc::new(BankCatalog::new(config.content_dir.clone()));

    let (coordinator, timer_rx) = SessionCoordinator::new(
        Arc::clone(&config),
        &db,
        clock,
        generator,
        catalog,
        ct.clone(),
    );
    let expiry_handle = spawn_expiry_consumer(timer_rx, Arc::clone(&coordinator), ct.clone());

    let http_ct = ct.clone();
    let http_coordinator = Arc::clone(&coordinator);
    let http_port = config.http_port;
    let http_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(http_coordinator, http_port, http_ct).await {
            error!(%err, "http server failed");
        }
    });

    info!("quizforge ready");

    shutdown_signal().await;
    info!("shutdown signal received");

    // Flush checkpoints before the background tasks are cancelled.
    coordinator.shutdown_flush().await;
    ct.cancel();

    let _ = tokio::join!(http_handle, expiry_handle, retention_handle);
    info!("quizforge shut down");

    Ok(())
}

/// Startup pass over state a prior crash may have left behind.
///
/// `Generating` sessions whose lock TTL has lapsed can never resolve;
/// they are marked `Failed` so recovery reports failure instead of
/// polling. `Submitting` rows are either completed (result landed) or
/// rolled back to `Expired` so their answers can still be finalized.
/// Expired locks are swept so the first acquire after restart does not
/// pay the reclaim path. `Active` sessions are left alone: clients
/// re-attach through recovery.
async fn reconcile_after_crash(
    config: &GlobalConfig,
    db: &Arc<db::Database>,
    clock: &Arc<SystemClock>,
) {
    let sessions = SessionRepo::new(Arc::clone(db));
    let locks = GenerationLocks::new(
        LockRepo::new(Arc::clone(db)),
        Arc::clone(clock) as Arc<dyn Clock>,
        config.generation.lock_ttl_seconds,
    );

    let ttl = i64::try_from(config.generation.lock_ttl_seconds).unwrap_or(i64::MAX);
    let cutoff = chrono::Utc::now() - ChronoDuration::seconds(ttl);
    match sessions.fail_stale_generating(cutoff).await {
        Ok(0) => info!("no stale generating sessions found on startup"),
        Ok(count) => warn!(count, "marked stale generating sessions failed"),
        Err(err) => error!(%err, "startup session reconciliation failed"),
    }

    match sessions.repair_interrupted_submitting().await {
        Ok(0) => {}
        Ok(count) => warn!(count, "rolled back sessions interrupted mid-submission"),
        Err(err) => error!(%err, "startup submission repair failed"),
    }

    match locks.sweep_expired().await {
        Ok(0) => {}
        Ok(count) => info!(count, "swept expired generation locks on startup"),
        Err(err) => error!(%err, "startup lock sweep failed"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
