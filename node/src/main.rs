//! # Vaultkeeper Node
//!
//! Entry point for the `vaultkeeper-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores the engine from disk and
//! serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`: start the coordinator
//! - `keygen`: print a fresh committee keypair
//! - `sign`: sign a command for `POST /commands`
//! - `version`: print build version information

mod api;
mod cli;
mod config;
mod logging;
mod metrics;
mod service;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use vaultkeeper_contracts::Command;
use vaultkeeper_protocol::crypto::CommitteeKeypair;
use vaultkeeper_protocol::storage::VaultDb;

use cli::{Commands, VaultkeeperCli};
use config::NodeConfig;
use metrics::NodeMetrics;
use service::{Service, SignedCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VaultkeeperCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Keygen => {
            print_keypair(&CommitteeKeypair::generate());
            Ok(())
        }
        Commands::Sign(args) => sign_command(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the coordinator: engine, API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(args.log_format)?;

    let config_path = args.config_path();
    let config = NodeConfig::load(&config_path)?;
    tracing::info!(
        config = %config_path.display(),
        orchestrator = %config.engine.orchestrator,
        relay_chain = config.engine.relay_chain,
        committees = config.committees.len(),
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting vaultkeeper-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = VaultDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Engine ---
    let service = Arc::new(
        Service::open(&config, db.clone(), Arc::clone(&node_metrics))
            .context("failed to restore engine state")?,
    );

    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: chrono::Utc::now(),
        service,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown signal received");
        }
    }

    db.flush().context("failed to flush database")?;
    tracing::info!("vaultkeeper-node stopped");
    Ok(())
}

fn print_keypair(keypair: &CommitteeKeypair) {
    println!("address    : {}", keypair.address());
    println!("public key : 0x{}", hex::encode(keypair.public_key()));
    println!("secret key : 0x{}", hex::encode(keypair.secret_bytes()));
}

/// Prints the JSON body of a signed command to stdout.
fn sign_command(args: cli::SignArgs) -> Result<()> {
    let keypair = CommitteeKeypair::from_hex(&args.key).context("invalid signer key")?;
    let command: Command =
        serde_json::from_str(&args.command).context("failed to parse command JSON")?;
    let signed = SignedCommand::sign(&keypair, args.block, command)?;
    println!("{}", serde_json::to_string_pretty(&signed)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("vaultkeeper-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc            {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    Ok(())
}
