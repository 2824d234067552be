// HWProxy session worker
//
// Runs the background half of the HWProxy debug-session tool: keeps the
// login state for every HWProxy server, polls the debug list while an
// observer is connected, and executes popup actions.
//
// Architecture:
// - Worker: owns the auth coordinator, catalog, reconciler and form cache
// - SessionStore: keyed volatile/durable storage with a change feed
// - EventBus: broadcast channel carrying storage changes and notices
// - stdio adapter: JSON commands in on stdin, JSON events out on stdout

mod cli;

use anyhow::{Context, Result};
use hwproxy_session::auth::flow::HttpAuthFlow;
use hwproxy_session::config::Config;
use hwproxy_session::events::{AppEvent, EventBus};
use hwproxy_session::logging;
use hwproxy_session::storage::SessionStore;
use hwproxy_session::worker::{Command, Worker};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI subcommands first (before any other initialization)
    if cli::handle_cli()? {
        return Ok(());
    }

    Config::ensure_config_exists();
    let config = Config::load()?;

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init(&config.logging);

    tracing::info!(
        "Starting hwproxy-session v{} (profile {})",
        hwproxy_session::config::VERSION,
        config.profile.as_str()
    );

    let bus = EventBus::new();
    let store = SessionStore::open(&config.data_dir, bus.clone())
        .with_context(|| format!("Failed to open storage in {}", config.data_dir.display()))?;

    // Subscribe before startup so its seeding writes reach stdout too
    let printer = tokio::spawn(print_events(bus.subscribe()));

    let flow = HttpAuthFlow::new(
        config.hwproxy.clone(),
        config.backend.request_timeout(),
    )?;
    let worker = Arc::new(Worker::new(config, store, Arc::new(flow))?);
    // Seeding is quick; the catalog refresh keeps running beside the dispatcher
    let catalog = worker.startup().await?;

    let (command_tx, command_rx) = mpsc::channel(32);
    let dispatch = worker.spawn_dispatch(command_rx);
    let reader = tokio::spawn(read_commands(command_tx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Shutdown requested");
        }
        _ = reader => tracing::info!("Command input closed"),
    }

    worker.shutdown();
    catalog.abort();
    dispatch.abort();
    printer.abort();
    Ok(())
}

/// Forward parsed stdin lines to the dispatcher until EOF
async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read command: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Command>(&line) {
            Ok(command) => {
                if tx.send(command).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Ignoring malformed command {:?}: {}", line, e),
        }
    }
}

/// Write every event as one JSON line on stdout
async fn print_events(mut rx: broadcast::Receiver<AppEvent>) {
    let mut stdout = tokio::io::stdout();

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Event output lagged, {} events dropped", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize event: {}", e);
                continue;
            }
        };
        line.push('\n');
        let written = match stdout.write_all(line.as_bytes()).await {
            Ok(()) => stdout.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::error!("Failed to write event: {}", e);
            break;
        }
    }
}
