//! claw-checker - Clawbernetes trigger checker
//!
//! Evaluates alerting triggers against stored metrics and emits notification
//! events on state changes.

use std::backtrace::Backtrace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use claw_checker::config::{Config, DEFAULT_CONFIG_PATH, LogConfig};
use claw_checker::{CheckContext, CheckerMetrics, CheckerService, MemoryDatabase, RemoteClient, TriggerChecker};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "claw-checker")]
#[command(about = "Clawbernetes trigger checker")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "CLAW_CHECKER_CONFIG")]
    config: PathBuf,

    /// Check a single trigger once, print the result and exit
    #[arg(short, long)]
    trigger: Option<String>,

    /// Read metric patterns with new values from stdin, one per line
    #[arg(long)]
    stdin_patterns: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_tracing(&config.log)?;
    install_panic_hook();

    let db = match &config.snapshot_path {
        Some(path) => MemoryDatabase::from_snapshot_file(path)
            .with_context(|| format!("failed to load snapshot {}", path.display()))?,
        None => MemoryDatabase::new(),
    };
    let db = Arc::new(db.with_event_capacity(config.checker.event_queue_capacity));

    let mut ctx = CheckContext::new(db.clone())
        .with_settings(config.checker.clone())
        .with_metrics(Arc::new(CheckerMetrics::new()));
    // The blocking client owns its own runtime and must be built outside ours.
    if config.remote.enabled {
        let client = RemoteClient::new(&config.remote.url, config.remote.timeout())?;
        info!(url = %client.url(), "remote render endpoint enabled");
        ctx = ctx.with_remote(Arc::new(client));
    }

    if let Some(trigger_id) = cli.trigger {
        return check_once(&ctx, &db, &trigger_id);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    let service = Arc::new(CheckerService::new(ctx, db));
    // Keep one reference here so the remote client is dropped outside the runtime.
    let result = runtime.block_on(run_service(Arc::clone(&service), cli.stdin_patterns));
    // A pending stdin read would otherwise hold the shutdown.
    runtime.shutdown_timeout(Duration::from_secs(1));
    drop(service);
    result
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return Ok(Config::from_file(path)?);
    }
    eprintln!("config {} not found, using defaults", path.display());
    Ok(Config::default())
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log.level))?;
    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::force_capture();
        error!(panic = %info, backtrace = %backtrace, "panic");
    }));
}

fn check_once(ctx: &CheckContext, db: &MemoryDatabase, trigger_id: &str) -> anyhow::Result<()> {
    let mut checker = TriggerChecker::init(ctx, trigger_id)?;
    checker.check()?;

    let check = db
        .last_check(trigger_id)
        .with_context(|| format!("no check stored for trigger {trigger_id}"))?;
    println!("{}", serde_json::to_string_pretty(&check)?);
    for event in db.take_events() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

async fn run_service(service: Arc<CheckerService>, stdin_patterns: bool) -> anyhow::Result<()> {
    let (pattern_tx, pattern_rx) = mpsc::channel(1024);
    let handle = Arc::clone(&service).start(pattern_rx);

    if stdin_patterns {
        let tx = pattern_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let pattern = line.trim();
                if pattern.is_empty() {
                    continue;
                }
                if tx.send(pattern.to_string()).await.is_err() {
                    break;
                }
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for SIGINT");
    } else {
        info!("received SIGINT, initiating shutdown");
    }
    drop(pattern_tx);
    handle.shutdown().await;

    let metrics = service.context().metrics.snapshot();
    info!(
        checks = metrics.checks,
        errors = metrics.check_errors,
        panics = metrics.panics,
        events = metrics.events,
        drained = metrics.events_drained,
        "checker stopped"
    );
    Ok(())
}
