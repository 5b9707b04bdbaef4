//! # Prometheus Metrics
//!
//! Operational metrics for the coordinator, scraped at `/metrics` on the
//! metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `vaultkeeper` prefix so they do not collide with any default global
//! registry consumers.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use vaultkeeper_contracts::command::{Outcome, Receipt};
use vaultkeeper_contracts::events::{Event, OrderKind};
use vaultkeeper_contracts::migration::MigrationStep;
use vaultkeeper_contracts::proposal::ProposalKind;
use vaultkeeper_contracts::ErrorClass;

fn proposal_kind(kind: ProposalKind) -> &'static str {
    match kind {
        ProposalKind::Keygen => "keygen",
        ProposalKind::Blame => "blame",
        ProposalKind::TxIn => "tx_in",
        ProposalKind::TxOut => "tx_out",
        ProposalKind::NetworkFee => "network_fee",
    }
}

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Applied commands, labelled by command name.
    pub commands_applied_total: IntCounterVec,
    /// Rejected commands, labelled by error class.
    pub commands_rejected_total: IntCounterVec,
    /// Finalized proposals, labelled by proposal kind.
    pub proposals_finalized_total: IntCounterVec,
    /// Migration heartbeat results, labelled by step.
    pub migration_steps_total: IntCounterVec,
    pub refunds_total: IntCounter,
    pub outbound_pending: IntGauge,
    /// Relay-chain block of the last applied command.
    pub block_height: IntGauge,
    pub command_latency_seconds: Histogram,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, collector: C) -> prometheus::Result<C> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("vaultkeeper".into()), None)?;

        let commands_applied_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("commands_applied_total", "Commands applied by the engine"),
                &["command"],
            )?,
        )?;
        let commands_rejected_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("commands_rejected_total", "Commands rejected by the engine"),
                &["class"],
            )?,
        )?;
        let proposals_finalized_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("proposals_finalized_total", "Proposals that reached quorum"),
                &["kind"],
            )?,
        )?;
        let migration_steps_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("migration_steps_total", "Migration heartbeat results"),
                &["step"],
            )?,
        )?;
        let refunds_total = register(
            &registry,
            IntCounter::new("refunds_total", "Transfers refunded on their source chain")?,
        )?;
        let outbound_pending = register(
            &registry,
            IntGauge::new("outbound_pending", "Outbound orders awaiting confirmation")?,
        )?;
        let block_height = register(
            &registry,
            IntGauge::new("block_height", "Relay-chain block of the last applied command")?,
        )?;
        let command_latency_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "command_latency_seconds",
                    "Time to apply and persist one command",
                )
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0]),
            )?,
        )?;

        Ok(Self {
            registry,
            commands_applied_total,
            commands_rejected_total,
            proposals_finalized_total,
            migration_steps_total,
            refunds_total,
            outbound_pending,
            block_height,
            command_latency_seconds,
        })
    }

    /// Records an applied command and what it produced.
    pub fn observe_receipt(&self, command: &str, receipt: &Receipt) {
        self.commands_applied_total.with_label_values(&[command]).inc();
        self.block_height.set(receipt.block as i64);

        for event in &receipt.events {
            match event {
                Event::ProposalFinalized { kind, .. } => {
                    self.proposals_finalized_total
                        .with_label_values(&[proposal_kind(*kind)])
                        .inc();
                }
                Event::OutboundIssued(order) if order.kind == OrderKind::Refund => {
                    self.refunds_total.inc()
                }
                Event::RelayDelivery(delivery) if delivery.refund => self.refunds_total.inc(),
                _ => {}
            }
        }

        if let Outcome::Migration(report) = &receipt.outcome {
            let step = match report.step {
                MigrationStep::Idle => "idle",
                MigrationStep::ContractFlip { .. } => "contract_flip",
                MigrationStep::Tranche { .. } => "tranche",
                MigrationStep::ChainMigrated { .. } => "chain_migrated",
                MigrationStep::Waiting => "waiting",
                MigrationStep::Retired { .. } => "retired",
            };
            self.migration_steps_total.with_label_values(&[step]).inc();
        }
    }

    pub fn observe_rejection(&self, class: ErrorClass) {
        self.commands_rejected_total
            .with_label_values(&[class.as_str()])
            .inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_labelled_by_class() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.observe_rejection(ErrorClass::Access);
        metrics.observe_rejection(ErrorClass::Access);
        metrics.observe_rejection(ErrorClass::Expiry);
        assert_eq!(
            metrics
                .commands_rejected_total
                .with_label_values(&["access"])
                .get(),
            2
        );
        let text = metrics.encode().unwrap();
        assert!(text.contains("vaultkeeper_commands_rejected_total{class=\"expiry\"} 1"));
    }

    #[test]
    fn migration_receipts_count_steps() {
        let metrics = NodeMetrics::new().unwrap();
        let receipt = Receipt {
            sequence: 3,
            block: 42,
            outcome: Outcome::Migration(vaultkeeper_contracts::migration::MigrationReport {
                step: MigrationStep::Waiting,
                remaining: true,
            }),
            events: vec![],
        };
        metrics.observe_receipt("migration_heartbeat", &receipt);
        assert_eq!(metrics.block_height.get(), 42);
        assert_eq!(
            metrics
                .migration_steps_total
                .with_label_values(&["waiting"])
                .get(),
            1
        );
    }
}
