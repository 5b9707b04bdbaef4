//! # CLI Interface
//!
//! Defines the command-line argument structure for `vaultkeeper-node` using
//! `clap` derive. Subcommands: `run`, `keygen`, `sign` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Vaultkeeper coordinator node.
///
/// Runs the threshold-custody engine: aggregates committee votes, tracks
/// vaults and balances, schedules migrations between committees and serves
/// the result over HTTP with Prometheus metrics on the side.
#[derive(Parser, Debug)]
#[command(
    name = "vaultkeeper-node",
    about = "Vaultkeeper coordinator node",
    version,
    propagate_version = true
)]
pub struct VaultkeeperCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the coordinator.
    Run(RunArgs),
    /// Generate a fresh committee keypair and print it.
    Keygen,
    /// Sign a command with a committee key and print the request body for
    /// `POST /commands`.
    Sign(SignArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (JSON).
    ///
    /// When omitted, the node looks for `config.json` in the data directory.
    #[arg(long, short = 'c', env = "VAULTKEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the command journal and state snapshots.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "VAULTKEEPER_DATA_DIR", default_value = "./vaultkeeper-data")]
    pub data_dir: PathBuf,

    /// Port for the REST API.
    #[arg(long, env = "VAULTKEEPER_API_PORT", default_value_t = 9841)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "VAULTKEEPER_METRICS_PORT", default_value_t = 9842)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "VAULTKEEPER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RunArgs {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.data_dir.join("config.json"))
    }
}

/// Arguments for the `sign` subcommand.
#[derive(Parser, Debug)]
pub struct SignArgs {
    /// Hex-encoded secp256k1 secret key of the sender.
    #[arg(long, env = "VAULTKEEPER_SIGNER_KEY")]
    pub key: String,

    /// Relay-chain block the command executes at.
    #[arg(long)]
    pub block: u64,

    /// The command as JSON, e.g. `"migration_heartbeat"` or
    /// `{"elect":{"epoch":2}}`.
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        VaultkeeperCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = VaultkeeperCli::parse_from(["vaultkeeper-node", "run", "--log-format", "json"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.log_format, LogFormat::Json);
                assert!(args.config_path().ends_with("config.json"));
            }
            other => panic!("unexpected subcommand {other:?}"),
        }
    }
}
