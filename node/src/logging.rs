//! # Structured Logging
//!
//! One `tracing` subscriber for the whole process. Engine events carry
//! structured fields (`epoch`, `chain`, `proposal`), so the JSON format is
//! the one to ship to a log pipeline; pretty output is for operators at a
//! terminal.
//!
//! Logs go to stderr. Stdout belongs to `keygen` and `sign`, whose output
//! is meant to be piped.

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or blank. Individual votes and
/// tranche math are logged at `debug` and stay hidden by default.
pub const DEFAULT_FILTER: &str =
    "vaultkeeper_node=info,vaultkeeper_contracts=info,vaultkeeper_protocol=warn,tower_http=info";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Installs the global subscriber. Fails if `RUST_LOG` does not parse or a
/// subscriber is already installed.
pub fn init_logging(format: LogFormat) -> Result<()> {
    let filter = env_filter(std::env::var("RUST_LOG").ok().as_deref())?;
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(layer.with_file(true).with_line_number(true))
            .try_init(),
        LogFormat::Json => registry
            .with(layer.json().flatten_event(true).with_current_span(false))
            .try_init(),
    }
    .context("tracing subscriber already installed")?;

    tracing::debug!(?format, "logging initialized");
    Ok(())
}

fn env_filter(directives: Option<&str>) -> Result<EnvFilter> {
    match directives.map(str::trim) {
        Some(d) if !d.is_empty() => {
            EnvFilter::try_new(d).with_context(|| format!("invalid RUST_LOG directives `{d}`"))
        }
        _ => Ok(EnvFilter::new(DEFAULT_FILTER)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_rust_log_falls_back_to_default() {
        for unset in [None, Some(""), Some("   ")] {
            let filter = env_filter(unset).unwrap().to_string().to_lowercase();
            assert!(filter.contains("vaultkeeper_contracts=info"), "{filter}");
        }
    }

    #[test]
    fn rust_log_overrides_default() {
        let filter = env_filter(Some("vaultkeeper_contracts=debug"))
            .unwrap()
            .to_string()
            .to_lowercase();
        assert!(filter.contains("vaultkeeper_contracts=debug"));
        assert!(!filter.contains("tower_http"));
    }

    #[test]
    fn malformed_rust_log_is_an_error() {
        assert!(env_filter(Some("vaultkeeper_node=loud")).is_err());
    }
}
