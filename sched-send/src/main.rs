//! sched-send - Dispatcher daemon for scheduled posts
//!
//! Ticks on an interval, claims posts that have fallen due and hands them
//! to the platform adapters. Posts left in `publishing` by a crashed worker
//! are recovered by the sweep at the start of every tick.

use clap::Parser;
use libschedcast::{logging, Config, SchedcastError, SchedcastService};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sched-send")]
#[command(version)]
#[command(about = "Dispatcher daemon for scheduled posts")]
#[command(long_about = "\
sched-send - Dispatcher daemon for scheduled posts

DESCRIPTION:
    sched-send is a long-running daemon that watches the Schedcast store
    and publishes each scheduled post to its platform once it falls due.

    Every tick it first returns posts stuck in 'publishing' (a worker died
    mid-attempt) to the queue, then claims due posts and publishes them
    concurrently. Transient platform failures are retried with exponential
    backoff; permanent ones fail the post.

    Several sched-send processes may share one database: a post is only
    ever claimed by one of them.

USAGE:
    # Run in foreground (logs to stderr)
    sched-send

    # Tick every 5 seconds
    sched-send --tick-interval 5

    # Process due posts once and exit
    sched-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (stops claiming, drains in-flight
                      publishes for up to dispatcher.shutdown_grace_secs)

CONFIGURATION:
    Configuration file: ~/.config/schedcast/config.toml
                        (or $SCHEDCAST_CONFIG, or --config)

    [dispatcher]
    tick_interval_secs = 10
    batch_size = 50
    max_concurrent = 8

    [retry]
    max_attempts = 5
    base_delay_secs = 30

ENVIRONMENT:
    SCHEDCAST_LOG_FORMAT - text, json or pretty (default: text)
    SCHEDCAST_LOG_LEVEL  - default filter when RUST_LOG is unset

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH", env = "SCHEDCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Tick interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to look for due posts (default: 10)")]
    tick_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run a single tick, wait for its publishes and exit
    #[arg(long, conflicts_with = "sweep_only")]
    once: bool,

    /// Only run the recovery sweep for stale 'publishing' posts, then exit
    #[arg(long)]
    sweep_only: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_default(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<SchedcastError>()
            .map(SchedcastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let config = apply_overrides(config, &cli);

    let service = SchedcastService::from_config(config).await?;
    let dispatcher = service.dispatcher();

    if cli.sweep_only {
        let now = chrono::Utc::now().timestamp();
        let stale_after = dispatcher.settings().stale_after;
        let recovered = service.store().requeue_stale(now, stale_after).await?;
        info!(recovered = recovered.len(), "Recovery sweep finished");
        service.close().await;
        return Ok(());
    }

    if cli.once {
        // Keep going while the pool was the only thing holding posts back
        let mut claimed = 0;
        let mut conflicts = 0;
        loop {
            let report = dispatcher.tick(chrono::Utc::now().timestamp()).await?;
            dispatcher.wait_idle().await;
            claimed += report.claimed;
            conflicts += report.conflicts;
            if report.deferred == 0 || report.claimed == 0 {
                break;
            }
        }
        info!(
            claimed,
            conflicts,
            "sched-send: processed due posts once, exiting"
        );
        service.close().await;
        return Ok(());
    }

    info!("sched-send daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    setup_signal_handlers(shutdown_tx)?;

    dispatcher.run(shutdown_rx).await?;
    service.close().await;

    info!("sched-send daemon stopped");
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> libschedcast::Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(secs) = cli.tick_interval {
        if secs == 0 {
            warn!("Ignoring --tick-interval 0");
        } else {
            config.dispatcher.tick_interval_secs = secs;
        }
    }
    config
}

/// Flip the shutdown channel on SIGINT/SIGTERM.
#[cfg(unix)]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    use anyhow::Context;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, draining...");
            let _ = shutdown.send(true);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, draining...");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}
