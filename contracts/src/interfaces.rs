//! # External Collaborators
//!
//! The engine reads committees from, and reports slashing to, a maintainer
//! registry it does not own. Finalized transfers, outbound orders and fee
//! observations are handed to a relay sink that settles them on the relay
//! chain and instructs the committees. Both are injected into
//! [`crate::engine::Core`] as trait objects so deployments and tests can plug
//! in their own.
//!
//! [`MemoryMaintainers`] and [`RecordingRelay`] are in-process
//! implementations. They are cheap to clone and clones share state, so a
//! caller can keep a handle after moving one into the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use vaultkeeper_protocol::{Address, ChainId, Epoch};

use crate::events::{NetworkFee, OutboundOrder, RelayDelivery};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Committee membership and slash-point bookkeeping.
pub trait MaintainerRegistry: Send {
    /// Committee elected for `epoch`, if the registry knows it.
    fn committee(&self, epoch: Epoch) -> Option<Vec<Address>>;

    /// Applies a signed slash-point change. Balances never go below zero.
    fn adjust_slash_points(&mut self, member: Address, delta: i64);

    fn slash_points(&self, member: &Address) -> u64;
}

/// Receiver of finalized outcomes.
pub trait RelaySink: Send {
    /// Funds released on the relay chain.
    fn on_delivery(&mut self, delivery: &RelayDelivery);

    /// A transfer the committee must sign on a foreign chain.
    fn on_outbound(&mut self, order: &OutboundOrder);

    fn on_network_fee(&mut self, chain: ChainId, fee: &NetworkFee);

    /// Key generation for `epoch` finished; `success` is false on blame.
    fn on_keygen(&mut self, _epoch: Epoch, _success: bool) {}
}

// ---------------------------------------------------------------------------
// In-memory maintainer registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MaintainersInner {
    committees: BTreeMap<Epoch, Vec<Address>>,
    slash_points: BTreeMap<Address, u64>,
}

/// Shared in-memory [`MaintainerRegistry`].
#[derive(Debug, Clone, Default)]
pub struct MemoryMaintainers {
    inner: Arc<Mutex<MaintainersInner>>,
}

impl MemoryMaintainers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_committee(&self, epoch: Epoch, members: Vec<Address>) {
        self.inner.lock().committees.insert(epoch, members);
    }

    /// Current slash points of every member with a non-zero balance.
    pub fn snapshot(&self) -> BTreeMap<Address, u64> {
        self.inner
            .lock()
            .slash_points
            .iter()
            .filter(|(_, p)| **p > 0)
            .map(|(a, p)| (*a, *p))
            .collect()
    }

    /// Replaces slash points wholesale, e.g. after loading them from disk.
    pub fn restore(&self, points: BTreeMap<Address, u64>) {
        self.inner.lock().slash_points = points;
    }
}

impl MaintainerRegistry for MemoryMaintainers {
    fn committee(&self, epoch: Epoch) -> Option<Vec<Address>> {
        self.inner.lock().committees.get(&epoch).cloned()
    }

    fn adjust_slash_points(&mut self, member: Address, delta: i64) {
        let mut inner = self.inner.lock();
        let points = inner.slash_points.entry(member).or_default();
        let magnitude = delta.unsigned_abs();
        if delta >= 0 {
            *points = points.saturating_add(magnitude);
        } else if magnitude > *points {
            warn!(%member, points = *points, delta, "slash refund below zero, flooring");
            *points = 0;
        } else {
            *points -= magnitude;
        }
        debug!(%member, delta, points = *points, "slash points adjusted");
    }

    fn slash_points(&self, member: &Address) -> u64 {
        self.inner
            .lock()
            .slash_points
            .get(member)
            .copied()
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Recording relay sink
// ---------------------------------------------------------------------------

/// A callback received by [`RecordingRelay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCall {
    Delivery(RelayDelivery),
    Outbound(OutboundOrder),
    NetworkFee(ChainId, NetworkFee),
    Keygen { epoch: Epoch, success: bool },
}

/// [`RelaySink`] that records every callback in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingRelay {
    calls: Arc<Mutex<Vec<RelayCall>>>,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RelayCall> {
        self.calls.lock().clone()
    }

    /// Outbound orders received so far.
    pub fn outbound(&self) -> Vec<OutboundOrder> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RelayCall::Outbound(order) => Some(order.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

impl RelaySink for RecordingRelay {
    fn on_delivery(&mut self, delivery: &RelayDelivery) {
        self.calls.lock().push(RelayCall::Delivery(delivery.clone()));
    }

    fn on_outbound(&mut self, order: &OutboundOrder) {
        self.calls.lock().push(RelayCall::Outbound(order.clone()));
    }

    fn on_network_fee(&mut self, chain: ChainId, fee: &NetworkFee) {
        self.calls.lock().push(RelayCall::NetworkFee(chain, *fee));
    }

    fn on_keygen(&mut self, epoch: Epoch, success: bool) {
        self.calls.lock().push(RelayCall::Keygen { epoch, success });
    }
}
