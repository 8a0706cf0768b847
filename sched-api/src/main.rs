//! sched-api - REST and WebSocket server for Schedcast

use clap::Parser;
use libschedcast::{logging, Config, SchedcastError, SchedcastService};
use sched_api::{serve, AppState};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sched-api")]
#[command(version)]
#[command(about = "REST and WebSocket API for scheduled posts")]
#[command(long_about = "\
sched-api - REST and WebSocket API for scheduled posts

DESCRIPTION:
    Serves the scheduling API and, unless --no-dispatcher is given, runs
    a dispatcher in the same process so WebSocket clients see status
    changes as they happen. Run sched-send separately when the API
    should only accept and report.

ENDPOINTS:
    POST   /scheduled-posts              Schedule a post
    GET    /scheduled-posts              List (status, platform, page, per_page)
    GET    /scheduled-posts/{id}         Fetch one post
    PATCH  /scheduled-posts/{id}         Reschedule while pending
    DELETE /scheduled-posts/{id}         Cancel while pending
    GET    /scheduled-posts/{id}/logs    Attempt history
    GET    /ws                           Status notifications
    GET    /health                       Liveness

    Every /scheduled-posts and /ws request needs an X-Owner-Id header.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH", env = "SCHEDCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides api.bind)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Do not run the embedded dispatcher
    #[arg(long)]
    no_dispatcher: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
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
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let bind = cli.bind.clone().unwrap_or_else(|| config.api.bind.clone());

    let service = SchedcastService::from_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher_task = if cli.no_dispatcher {
        None
    } else {
        let dispatcher = service.dispatcher();
        Some(tokio::spawn(async move { dispatcher.run(shutdown_rx).await }))
    };

    serve(AppState::new(service.clone()), &bind, shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = dispatcher_task {
        task.await??;
    }
    service.close().await;

    info!("sched-api stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining...");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from(["sched-api", "--bind", "0.0.0.0:9000", "--no-dispatcher"]).unwrap();
        assert_eq!(cli.bind.as_deref(), Some("0.0.0.0:9000"));
        assert!(cli.no_dispatcher);
        assert!(!cli.verbose);
    }
}
