//! chainqueue CLI: run the ingestion pipeline and inspect the queue.
//!
//! Usage:
//! ```bash
//! chainqueue run    --config chainqueue.yaml
//! chainqueue status --config chainqueue.yaml
//! chainqueue info
//! ```

mod config;
mod logging;

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use chainqueue_core::chain::{ChainConnector, ChainHandle};
use chainqueue_core::store::{QueueStore, RecordReader};
use chainqueue_core::IngestConfig;
use chainqueue_evm::{EvmConnector, EvmRpcClient};
use chainqueue_pipeline::IngestBuilder;
use chainqueue_storage::SqliteStorage;

use crate::config::AppConfig;
use crate::logging::init_tracing;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let outcome = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainqueue {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainqueue {}", env!("CARGO_PKG_VERSION"));
    println!("Durable, queue-driven EVM block ingestion\n");
    println!("USAGE:");
    println!("    chainqueue <COMMAND> [--config <FILE>]\n");
    println!("COMMANDS:");
    println!("    run      Follow the chain head and drain the queue until Ctrl-C");
    println!("    status   Show queue progress and the latest committed block");
    println!("    info     Show ChainQueue defaults");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("ENVIRONMENT:");
    println!("    JSON_RPC_API_URL  HTTP JSON-RPC endpoint");
    println!("    WS_RPC_URL        WebSocket endpoint for newHeads");
    println!("    DATABASE_URL      SQLite file path or sqlite: URL");
    println!("    RUST_LOG          Log filter (overrides the config file)");
}

/// Value following `name` in `args`, e.g. `--config file.yaml`.
fn parse_flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn load_config(args: &[String]) -> anyhow::Result<AppConfig> {
    let path = parse_flag(args, "--config").map(PathBuf::from);
    AppConfig::load(path.as_deref())
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    init_tracing(&config.log);

    let store = Arc::new(
        SqliteStorage::open(&config.node.database_url)
            .await
            .with_context(|| format!("opening store {}", config.node.database_url))?,
    );
    // unprobed: if the node is down at startup the supervisor's reconnect loop takes over
    let client = Arc::new(EvmRpcClient::new(config.node.endpoints())?);
    let connector: Arc<dyn ChainConnector> = Arc::new(EvmConnector::new(config.node.endpoints()));

    let pipeline = IngestBuilder::new()
        .config(config.ingest.clone())
        .build(store, ChainHandle::new(client), connector)?;

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
        }
        let _ = stop.send(true);
    });

    tracing::info!(
        rpc = %config.node.rpc_url,
        ws = %config.node.ws_url,
        db = %config.node.database_url,
        "chainqueue starting"
    );
    pipeline.run(shutdown).await?;
    Ok(())
}

async fn cmd_status(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let store = SqliteStorage::open(&config.node.database_url)
        .await
        .with_context(|| format!("opening store {}", config.node.database_url))?;

    let stats = store.queue_stats().await?;
    let marker = store.latest_marker().await?;
    let latest = store.latest_block().await?;

    println!("Store: {}", config.node.database_url);
    println!("  Queued heights:  {}", stats.total());
    println!("  Pending:         {}", stats.pending);
    println!("  Done:            {} ({:.2}%)", stats.done, stats.percent_done());
    match marker {
        Some(h) => println!("  Latest enqueued: {h}"),
        None => println!("  Latest enqueued: -"),
    }
    match latest {
        Some(block) => println!(
            "  Latest block:    {} ({}, validator {})",
            block.number, block.hash, block.validator
        ),
        None => println!("  Latest block:    -"),
    }
    Ok(())
}

fn cmd_info() {
    let defaults = IngestConfig::default();
    println!("ChainQueue v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default enqueue chunk: {} heights", defaults.chunk_size);
    println!("  Default drain batch: {} heights/cycle", defaults.drain_batch_limit);
    println!("  Default drain workers: {}", defaults.drain_workers);
    println!(
        "  Default reconnect backoff: {}ms x{} (max {}ms)",
        defaults.reconnect_initial_ms, defaults.reconnect_multiplier, defaults.reconnect_max_ms
    );
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Chains: EVM JSON-RPC (HTTP + WebSocket newHeads)");
}
