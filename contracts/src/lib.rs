//! # Vaultkeeper Engine
//!
//! The threshold-custody engine that runs on the relay chain. Committees of
//! maintainers jointly hold one aggregate key per epoch (a *vault*) and use
//! it to custody user funds on foreign chains. This crate decides, from the
//! committees' votes, which keys exist, which transfers happened and where
//! funds must move:
//!
//! - **Threshold consensus** ([`tss`], [`proposal`]) aggregates member votes
//!   into finalized decisions on key generation, deposits, outbound
//!   confirmations and network fees, with temporary vote penalties that are
//!   refunded on finalization.
//! - **Vault registry** ([`vault`]) tracks each vault from election through
//!   retirement and which vault custodies which chain.
//! - **Balance ledger** ([`ledger`], [`rebalance`]) accounts per token and
//!   chain, prices transfers against the target distribution and refuses to
//!   commit funds a chain does not hold.
//! - **Migration scheduler** ([`migration`]) moves custody from a retiring
//!   vault to the active one in bounded steps.
//!
//! Everything is driven through [`engine::Core::apply`], one command at a
//! time.
//!
//! ## Design Principles
//!
//! 1. All accounting uses checked arithmetic.
//! 2. A command either applies completely or not at all.
//! 3. Lifecycle stages are enum variants, never boolean flags.
//! 4. External effects leave the engine only after a command committed.

pub mod command;
pub mod engine;
pub mod error;
pub mod events;
pub mod interfaces;
pub mod ledger;
pub mod migration;
pub mod proposal;
pub mod rebalance;
pub mod tss;
pub mod vault;

pub use crate::command::{Command, Envelope, Outcome, Receipt};
pub use crate::engine::{Core, EngineState};
pub use crate::error::{EngineError, ErrorClass};
pub use crate::events::Event;
pub use crate::interfaces::{MaintainerRegistry, MemoryMaintainers, RecordingRelay, RelaySink};
