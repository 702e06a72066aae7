//! # Outbox Inspection Tool
//!
//! Reads and repairs the durable transaction queue without starting the
//! network monitor or draining anything.
//!
//! ## Usage
//! ```bash
//! # Queue summary
//! cargo run -p tally-sync --bin tally-outbox -- status
//!
//! # Every queued item, oldest first
//! cargo run -p tally-sync --bin tally-outbox -- list
//!
//! # Manual actions
//! cargo run -p tally-sync --bin tally-outbox -- retry <ID>
//! cargo run -p tally-sync --bin tally-outbox -- resolve <ID>
//! cargo run -p tally-sync --bin tally-outbox -- cancel <ID>
//!
//! # Mint a record number (probes once to pick the prefix)
//! cargo run -p tally-sync --bin tally-outbox -- number
//!
//! # Use a specific config file
//! cargo run -p tally-sync --bin tally-outbox -- --config ./sync.toml status
//! ```
//!
//! Stop the POS client first: the engine owns the snapshot and rewrites
//! it on every mutation.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tally_sync::{StorageBackend, SyncAgent, SyncConfig, TransactionStatus};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("Tally Outbox Tool");
    println!();
    println!("Usage: tally-outbox [OPTIONS] <COMMAND> [ID]");
    println!();
    println!("Commands:");
    println!("  status           Queue counts and persistence health");
    println!("  list             Every queued transaction, oldest first");
    println!("  retry <ID>       Move a FAILED or CONFLICT item back to PENDING");
    println!("  resolve <ID>     Remove a CONFLICT item after manual resolution");
    println!("  cancel <ID>      Remove a PENDING or FAILED item");
    println!("  number           Mint a record number for the current connectivity");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>  Config file (default: platform config dir)");
    println!("  -h, --help           Show this help message");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tally=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let Some(command) = positional.first().cloned() else {
        print_usage();
        return ExitCode::FAILURE;
    };
    let id = positional.get(1).cloned();

    match run(config_path, &command, id).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: Option<PathBuf>, command: &str, id: Option<String>) -> Result<(), String> {
    let config = SyncConfig::load(config_path).map_err(|e| e.to_string())?;

    if config.storage.backend == StorageBackend::Memory {
        return Err("storage backend is 'memory'; there is no durable queue to inspect".into());
    }

    let agent = SyncAgent::builder(config)
        .build()
        .await
        .map_err(|e| e.to_string())?;

    let require_id = || id.clone().ok_or_else(|| format!("'{}' needs a transaction id", command));

    match command {
        "status" => {
            let status = agent.status().await;
            let counts = agent.queue().counts().await;
            println!("Store:        {}", agent.queue().store_location());
            println!("Pending:      {}", counts.pending);
            println!("Syncing:      {}", counts.syncing);
            println!("Failed:       {}", counts.failed);
            println!("Conflict:     {}", counts.conflict);
            println!("Outstanding:  {}", status.pending_count);
            if status.persist_failures > 0 {
                println!("⚠ Snapshot writes failing: {} in a row", status.persist_failures);
            }
        }

        "list" => {
            let items = agent.items().await;
            if items.is_empty() {
                println!("Queue is empty");
            }
            for item in items {
                println!(
                    "{}  {:<9} {:<16} attempts={} created={}",
                    item.id,
                    item.status,
                    item.kind,
                    item.attempt_count,
                    item.created_at.to_rfc3339()
                );
                if let Some(err) = item.last_error {
                    println!("    last error: {}", err);
                }
            }
        }

        "retry" => {
            let id = require_id()?;
            agent.retry(&id).await.map_err(|e| e.to_string())?;
            println!("✓ {} is pending again", id);
        }

        "resolve" => {
            let id = require_id()?;
            let item = agent.resolve(&id).await.map_err(|e| e.to_string())?;
            println!("✓ Removed {} ({})", item.id, item.kind);
            println!("{}", serde_json::to_string_pretty(&item.payload).map_err(|e| e.to_string())?);
        }

        "cancel" => {
            let id = require_id()?;
            let status = agent.get(&id).await.map(|item| item.status);
            if !agent.cancel_pending(&id).await {
                return Err(match status {
                    None => format!("{} is not in the queue", id),
                    Some(TransactionStatus::Conflict) => {
                        format!("{} is in conflict; use 'resolve'", id)
                    }
                    Some(other) => format!("{} is {} and cannot be cancelled", id, other),
                });
            }
            println!("✓ Cancelled {}", id);
        }

        "number" => {
            agent.monitor().poll_once().await;
            let number = agent.next_record_number().map_err(|e| e.to_string())?;
            println!("{}  ({})", number, agent.connectivity());
        }

        other => {
            print_usage();
            return Err(format!("unknown command '{}'", other));
        }
    }

    Ok(())
}
