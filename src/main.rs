// src/main.rs — interviewd CLI entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use interviewd::api::{self, spawn_feedback, EngineState};
use interviewd::feedback::generator::{DisabledGenerator, FeedbackGenerator, HttpGenerator};
use interviewd::infra::config::Config;
use interviewd::infra::logger;
use interviewd::ledger::TxnType;
use interviewd::store::server::spawn_store_server;
use interviewd::store::Store;

#[derive(Parser)]
#[command(name = "interviewd", version, about = "Usage-metered interview session engine")]
struct Cli {
    /// Path to the SQLite database.
    #[arg(long, global = true, default_value = "interviewd.db")]
    db: PathBuf,

    /// Log level filter (overrides RUST_LOG).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server with the background reaper.
    Serve,
    /// Run one zombie-session sweep and exit.
    Sweep,
    /// Credit seconds to an owner's balance.
    Grant {
        owner: String,
        seconds: i64,
        /// Idempotency key; re-running with the same key is a no-op.
        #[arg(long)]
        key: String,
        #[arg(long, default_value = "manual grant")]
        description: String,
    },
    /// Show an owner's remaining balance and recent transactions.
    Balance { owner: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logger::init_logging(&cli.log_level);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = Store::open(&cli.db)?;
    let (handle, _store_task) = spawn_store_server(store);

    match cli.command {
        Command::Serve => {
            let generator: Arc<dyn FeedbackGenerator> = match config.feedback.generator_url.clone()
            {
                Some(url) => Arc::new(HttpGenerator::new(url, config.feedback.api_key.clone())),
                None => {
                    tracing::warn!("No generator_url configured; feedback generation is disabled");
                    Arc::new(DisabledGenerator)
                }
            };

            let state = EngineState::new(handle, config, generator);

            // Completed sessions whose feedback never landed (crash between
            // commit and pipeline finish) are re-driven on startup.
            let pending = state.store.pending_feedback_sessions().await?;
            if !pending.is_empty() {
                tracing::info!(count = pending.len(), "Re-driving pending feedback sessions");
                for id in pending {
                    spawn_feedback(&state, id);
                }
            }

            spawn_reaper(state.clone());
            spawn_janitor(state.clone());

            api::start_server(state).await
        }
        Command::Sweep => {
            let report =
                interviewd::engine::reaper::sweep(&handle, &config.metering).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Grant {
            owner,
            seconds,
            key,
            description,
        } => {
            let applied = handle
                .apply_credit(owner.clone(), seconds, TxnType::Grant, key, description)
                .await?;
            if applied {
                println!("Granted {seconds}s to {owner}");
            } else {
                println!("Already applied (idempotency key seen before)");
            }
            Ok(())
        }
        Command::Balance { owner } => {
            let remaining = handle.balance(owner.clone()).await?;
            println!("{owner}: {remaining}s remaining");
            for txn in handle.transactions(owner).await? {
                println!(
                    "  {}  {:>8}s  {:<12} {}",
                    txn.created_at, txn.seconds_delta, txn.txn_type.as_str(), txn.description
                );
            }
            Ok(())
        }
    }
}

/// Periodic zombie sweep inside the serve process.
fn spawn_reaper(state: EngineState) {
    tokio::spawn(async move {
        let period = Duration::from_secs(state.config.metering.sweep_interval_minutes * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup isn't a sweep.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match interviewd::engine::reaper::sweep(&state.store, &state.config.metering).await {
                Ok(report) => {
                    for id in &report.closed {
                        state.session_cache.invalidate(id);
                    }
                }
                Err(e) => tracing::error!("Zombie sweep failed: {e}"),
            }
            // Sessions can also be closed out of band (the HTTP sweep
            // trigger, a crash before a pipeline finished), so re-drive
            // whatever is still pending on every tick.
            for id in state
                .store
                .pending_feedback_sessions()
                .await
                .unwrap_or_default()
            {
                spawn_feedback(&state, id);
            }
        }
    });
}

/// Keeps the in-memory rate limiter and session cache from growing unbounded.
fn spawn_janitor(state: EngineState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            let now = std::time::Instant::now();
            state.segment_limiter.evict_idle(now);
            state.create_limiter.evict_idle(now);
            state.session_cache.evict_expired(now);
        }
    });
}
