//! # Coordinator Service
//!
//! The serialization point of the node. The engine is single-writer: every
//! command is authenticated, applied under one mutex and persisted before
//! the mutex is released, so the journal on disk is exactly the order in
//! which commands took effect.
//!
//! ## Signed commands
//!
//! Callers sign `keccak256(bincode((block, command)))` with their committee
//! key. The recovered address becomes the envelope sender; nothing in the
//! request body can claim an identity.
//!
//! ## Persistence
//!
//! After each applied command the envelope is appended to the journal and a
//! [`NodeSnapshot`] (engine state plus slash points) is stored in the same
//! sled transaction. On start-up the newest snapshot is restored. If the
//! write fails the in-memory engine is rolled back to the last durable
//! snapshot so memory never runs ahead of disk.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use vaultkeeper_contracts::events::{NetworkFee, OutboundOrder, RelayDelivery};
use vaultkeeper_contracts::{
    Command, Core, EngineError, EngineState, Envelope, MemoryMaintainers, Receipt, RelaySink,
};
use vaultkeeper_protocol::config::EngineConfig;
use vaultkeeper_protocol::crypto::{keccak256, recover_signer, CommitteeKeypair, CryptoError};
use vaultkeeper_protocol::storage::{DbError, VaultDb};
use vaultkeeper_protocol::types::hex_bytes;
use vaultkeeper_protocol::{Address, BlockNumber, ChainId, Epoch, Hash256};

use crate::config::NodeConfig;
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid signature: {0}")]
    Signature(#[from] CryptoError),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

// ---------------------------------------------------------------------------
// Signed commands
// ---------------------------------------------------------------------------

/// A command as submitted over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCommand {
    pub block: BlockNumber,
    pub command: Command,
    /// 65-byte recoverable signature over [`signing_digest`].
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// Digest a sender signs for `command` at `block`.
pub fn signing_digest(block: BlockNumber, command: &Command) -> Result<Hash256, ServiceError> {
    let bytes =
        bincode::serialize(&(block, command)).map_err(|e| ServiceError::Encoding(e.to_string()))?;
    Ok(keccak256(&bytes))
}

impl SignedCommand {
    pub fn sign(
        keypair: &CommitteeKeypair,
        block: BlockNumber,
        command: Command,
    ) -> Result<Self, ServiceError> {
        let digest = signing_digest(block, &command)?;
        Ok(Self {
            block,
            command,
            signature: keypair.sign_digest(&digest),
        })
    }

    /// Address that produced the signature.
    pub fn sender(&self) -> Result<Address, ServiceError> {
        let digest = signing_digest(self.block, &self.command)?;
        Ok(recover_signer(&digest, &self.signature)?)
    }

    pub fn into_envelope(self) -> Result<Envelope, ServiceError> {
        let sender = self.sender()?;
        Ok(Envelope {
            block: self.block,
            sender,
            command: self.command,
        })
    }
}

// ---------------------------------------------------------------------------
// Relay sink
// ---------------------------------------------------------------------------

/// Relay sink that reports finalized outcomes to the log. Pending outbound
/// orders stay queryable from engine state until confirmed.
#[derive(Debug, Default)]
pub struct LogRelay;

impl RelaySink for LogRelay {
    fn on_delivery(&mut self, delivery: &RelayDelivery) {
        info!(
            order = %delivery.order_id,
            token = %delivery.token,
            amount = %delivery.amount,
            refund = delivery.refund,
            "relay delivery"
        );
    }

    fn on_outbound(&mut self, order: &OutboundOrder) {
        info!(
            order = %order.order_id,
            kind = ?order.kind,
            chain = order.chain,
            amount = %order.amount,
            vault = %order.vault,
            "outbound order issued"
        );
    }

    fn on_network_fee(&mut self, chain: ChainId, fee: &NetworkFee) {
        info!(chain, height = fee.height, fee_per_gas = %fee.fee_per_gas, "network fee updated");
    }

    fn on_keygen(&mut self, epoch: Epoch, success: bool) {
        if success {
            info!(epoch, "key generation completed");
        } else {
            warn!(epoch, "key generation failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything needed to resume after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub state: EngineState,
    pub slash_points: BTreeMap<Address, u64>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct Service {
    core: Mutex<Core>,
    engine: EngineConfig,
    maintainers: MemoryMaintainers,
    db: VaultDb,
    metrics: SharedMetrics,
    snapshots_to_keep: usize,
}

impl Service {
    /// Opens the service on `db`, resuming from its newest snapshot.
    pub fn open(config: &NodeConfig, db: VaultDb, metrics: SharedMetrics) -> Result<Self, ServiceError> {
        let maintainers = MemoryMaintainers::new();
        for (epoch, members) in &config.committees {
            maintainers.set_committee(*epoch, members.clone());
        }

        let snapshot = match db.load_latest::<NodeSnapshot>()? {
            Some((seq, snapshot)) => {
                info!(
                    sequence = seq,
                    block = snapshot.state.block(),
                    "restored engine snapshot"
                );
                snapshot
            }
            None => {
                info!("empty database, starting from genesis state");
                NodeSnapshot::default()
            }
        };

        let core = Self::build_core(&config.engine, &maintainers, snapshot);
        metrics.block_height.set(core.state().block() as i64);
        metrics
            .outbound_pending
            .set(core.state().outbound().count() as i64);

        Ok(Self {
            core: Mutex::new(core),
            engine: config.engine.clone(),
            maintainers,
            db,
            metrics,
            snapshots_to_keep: config.snapshots_to_keep,
        })
    }

    fn build_core(engine: &EngineConfig, maintainers: &MemoryMaintainers, snapshot: NodeSnapshot) -> Core {
        maintainers.restore(snapshot.slash_points);
        Core::restore(
            engine.clone(),
            snapshot.state,
            Box::new(maintainers.clone()),
            Box::new(LogRelay),
        )
    }

    /// Authenticates and applies a signed command.
    pub fn submit(&self, signed: SignedCommand) -> Result<Receipt, ServiceError> {
        let envelope = signed.into_envelope()?;
        self.execute(&envelope)
    }

    /// Applies an already authenticated envelope and persists the result.
    pub fn execute(&self, envelope: &Envelope) -> Result<Receipt, ServiceError> {
        let started = Instant::now();
        let mut core = self.core.lock();

        let receipt = match core.apply(envelope) {
            Ok(receipt) => receipt,
            Err(e) => {
                debug!(
                    sender = %envelope.sender,
                    command = envelope.command.name(),
                    class = e.class().as_str(),
                    error = %e,
                    "command rejected"
                );
                self.metrics.observe_rejection(e.class());
                return Err(e.into());
            }
        };

        let snapshot = NodeSnapshot {
            state: core.state().clone(),
            slash_points: self.maintainers.snapshot(),
        };
        if let Err(e) = self.db.commit(receipt.sequence, envelope, &snapshot) {
            error!(sequence = receipt.sequence, error = %e, "failed to persist command, rolling back");
            *core = self.reload()?;
            return Err(e.into());
        }
        if self.db.snapshot_count() > self.snapshots_to_keep {
            if let Err(e) = self.db.prune_snapshots(self.snapshots_to_keep) {
                warn!(error = %e, "snapshot pruning failed");
            }
        }

        self.metrics
            .observe_receipt(envelope.command.name(), &receipt);
        self.metrics
            .outbound_pending
            .set(core.state().outbound().count() as i64);
        self.metrics
            .command_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        Ok(receipt)
    }

    fn reload(&self) -> Result<Core, ServiceError> {
        let snapshot = self
            .db
            .load_latest::<NodeSnapshot>()?
            .map(|(_, snapshot)| snapshot)
            .unwrap_or_default();
        Ok(Self::build_core(&self.engine, &self.maintainers, snapshot))
    }

    /// Runs `f` against the engine under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&Core) -> R) -> R {
        f(&self.core.lock())
    }

    pub fn journal_entry(&self, sequence: u64) -> Result<Option<Envelope>, ServiceError> {
        Ok(self.db.journal_entry(sequence)?)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("core", &*self.core.lock())
            .finish_non_exhaustive()
    }
}
