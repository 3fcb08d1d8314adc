//! whitesync
//!
//! Keeps a game server whitelist in step with approved Bitable submissions.
//! One-shot subcommands for adding, removing and listing, a console
//! passthrough, and a `watch` mode that repeats the add run on an interval.
//! User-facing output uses writeln! to stdout.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use whitesync_core::config::{load_config, LogLevel};
use whitesync_core::tracing_init::{default_filter, init_tracing};
use whitesync_daemon::app::build_reconciler;
use whitesync_daemon::reconcile::{Reconciler, RemovalOutcome, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "whitesync")]
#[command(version, about = "whitesync - game server whitelist reconciliation")]
struct Args {
    /// Config file path (defaults to <config dir>/whitesync/config.toml)
    #[arg(long, env = "WHITESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn"); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "WHITESYNC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Whitelist all approved submissions once
    Add,
    /// Remove the player registered by a departed group member
    Remove {
        /// QQ number of the member who left
        #[arg(long)]
        qq: String,
    },
    /// Show approved submissions without changing anything
    List,
    /// Send a raw console command and print its output
    Console {
        /// Command line to send
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Repeat the add run until interrupted
    Watch {
        /// Seconds between runs
        #[arg(long, default_value_t = 300, env = "WHITESYNC_INTERVAL_SECS")]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log_level = LogLevel(level);
    }
    init_tracing(&default_filter(&config.log_level.0), args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?args.command,
        "Starting whitesync"
    );

    let reconciler = build_reconciler(&config)?;
    let mut out = io::stdout();

    match args.command {
        Command::Add => {
            let (_shutdown_tx, shutdown_rx) = watch::channel(false);
            let report = reconciler.add_approved(&shutdown_rx).await;
            writeln!(out, "{}", report.summary())?;
            if matches!(report.outcome, RunOutcome::QueryFailed(_)) {
                anyhow::bail!("record search failed");
            }
        }
        Command::Remove { qq } => match reconciler.remove_member(&qq).await {
            RemovalOutcome::Removed { game_id, output } => {
                writeln!(out, "Removed {game_id} from the whitelist")?;
                if !output.is_empty() {
                    writeln!(out, "{output}")?;
                }
            }
            RemovalOutcome::NotFound => writeln!(out, "No whitelist entry on record for {qq}")?,
            RemovalOutcome::QueryFailed(reason) => anyhow::bail!("record search failed: {reason}"),
            RemovalOutcome::DispatchFailed { game_id, reason } => {
                anyhow::bail!("removing {game_id} failed: {reason}")
            }
        },
        Command::List => {
            let listing = reconciler.list().await;
            for record in &listing.records {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    record.game_id,
                    record.qq_number,
                    record.score_display()
                )?;
            }
            writeln!(
                out,
                "{} approved of {} fetched ({:?})",
                listing.records.len(),
                listing.fetched,
                listing.stop
            )?;
        }
        Command::Console { command } => {
            let output = reconciler.console(&command.join(" ")).await?;
            writeln!(out, "{}", output.text())?;
        }
        Command::Watch { interval_secs } => {
            watch_loop(&reconciler, Duration::from_secs(interval_secs.max(1))).await?;
        }
    }

    Ok(())
}

/// Run the add flow every `interval` until Ctrl+C or SIGTERM.
async fn watch_loop(reconciler: &Reconciler, interval: Duration) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut stop_rx = shutdown_tx.subscribe();

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let runs = async {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {}
            }
            let report = reconciler.add_approved(&shutdown_rx).await;
            if report.cancelled {
                break;
            }
            if matches!(report.outcome, RunOutcome::QueryFailed(_)) {
                warn!("Record search failed, retrying next interval");
            }
        }
    };

    let signals = async {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }
        let _ = shutdown_tx.send(true);
    };

    info!(interval_secs = interval.as_secs(), "Watching for approved submissions");
    // The run loop finishes its current record once the signal fires.
    tokio::join!(runs, signals);
    info!("Watch stopped");
    Ok(())
}
