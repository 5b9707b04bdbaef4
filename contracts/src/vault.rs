//! # Vault Registry
//!
//! A vault is the aggregate key produced by one committee's key generation.
//! The registry owns the lifecycle of every vault record, the epoch-to-key
//! mapping and the chain registry, and knows which vault is responsible for
//! which chain while a rotation is migrating funds.
//!
//! ## Lifecycle
//!
//! ```text
//! election ──► KeygenPending ──► KeygenCompleted ──► Active ──► Retiring ──► Migrating ──► Retired
//!                    │
//!                    └──► KeygenFailed (blame finalized or window expired; re-election allowed)
//! ```
//!
//! An election creates a pending record for its epoch. A successful key
//! generation moves the record under its permanent key (the hash of the
//! aggregate public key). Rotation promotes the new vault to `Active`, which
//! makes it the migration target, and demotes the outgoing one to
//! `Retiring`. At most one vault is active and at most one is retiring or
//! migrating at any time.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use vaultkeeper_protocol::config::ELECTION_PENDING_KEY;
use vaultkeeper_protocol::crypto::{address_from_pubkey, vault_key, CryptoError};
use vaultkeeper_protocol::types::hex_bytes;
use vaultkeeper_protocol::{Address, Amount, BlockNumber, ChainId, Epoch, Hash256, TokenId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("chain {0} is not registered")]
    UnknownChain(ChainId),

    #[error("chain {0} is already registered")]
    ChainAlreadyRegistered(ChainId),

    #[error("committee for epoch {0} is empty")]
    EmptyCommittee(Epoch),

    #[error("member {0} appears twice in the committee")]
    DuplicateMember(Address),

    #[error("election for epoch {0} is still in progress")]
    ElectionInProgress(Epoch),

    #[error("epoch {0} already has a vault key")]
    EpochAlreadyKeyed(Epoch),

    #[error("no election pending for epoch {0}")]
    NoPendingElection(Epoch),

    #[error("vault {0} does not exist")]
    UnknownVault(Hash256),

    #[error("vault {0} already exists")]
    DuplicateVault(Hash256),

    #[error("vault {key} is {actual}, expected {expected}")]
    InvalidState {
        key: Hash256,
        expected: VaultStatus,
        actual: VaultStatus,
    },

    #[error("a migration is still in progress")]
    MigrationInProgress,

    #[error("outgoing vault {got:?} does not match the active vault {expected:?}")]
    VaultMismatch {
        expected: Option<Hash256>,
        got: Option<Hash256>,
    },

    #[error("no active vault")]
    NoActiveVault,

    #[error("chain {0} is not awaiting a contract migration")]
    ChainNotMigrating(ChainId),

    #[error("invalid vault public key: {0}")]
    InvalidPublicKey(#[from] CryptoError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    Unknown,
    KeygenPending,
    KeygenCompleted,
    KeygenFailed,
    Active,
    Retiring,
    Migrating,
    Retired,
}

impl std::fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VaultStatus::Unknown => "Unknown",
            VaultStatus::KeygenPending => "KeygenPending",
            VaultStatus::KeygenCompleted => "KeygenCompleted",
            VaultStatus::KeygenFailed => "KeygenFailed",
            VaultStatus::Active => "Active",
            VaultStatus::Retiring => "Retiring",
            VaultStatus::Migrating => "Migrating",
            VaultStatus::Retired => "Retired",
        };
        f.write_str(name)
    }
}

/// How a foreign chain custodies funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    /// A vault contract holds the funds; migrating means flipping its
    /// signer to the new vault key.
    Contract,
    /// The vault key holds funds directly; migrating means transferring
    /// them. `gas_reserve` of the gas token is kept back to pay for those
    /// transfers.
    Custodial {
        gas_token: TokenId,
        gas_reserve: Amount,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain: ChainId,
    pub kind: ChainKind,
}

/// Migration state of one chain in a vault's assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainMigration {
    /// Held by this vault; nothing moved yet.
    Assigned,
    /// Migration started (contract flip issued or tranches in flight).
    Migrating,
    /// Handed over to the incoming vault.
    Migrated,
}

/// A vault record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    /// Hash of the aggregate public key, or [`ELECTION_PENDING_KEY`] while
    /// the key is being generated.
    pub key: Hash256,
    pub epoch: Epoch,
    pub status: VaultStatus,
    #[serde(with = "hex_bytes")]
    pub pubkey: Vec<u8>,
    /// Sorted, duplicate-free committee.
    pub members: Vec<Address>,
    pub elected_at: BlockNumber,
    pub keygen_at: Option<BlockNumber>,
    pub activated_at: Option<BlockNumber>,
    pub retiring_at: Option<BlockNumber>,
    pub retired_at: Option<BlockNumber>,
    pub chains: BTreeMap<ChainId, ChainMigration>,
}

impl VaultRecord {
    pub fn is_member(&self, address: &Address) -> bool {
        self.members.binary_search(address).is_ok()
    }

    /// On-chain address of the vault key.
    pub fn address(&self) -> Result<Address, CryptoError> {
        address_from_pubkey(&self.pubkey)
    }

    /// Chains still waiting to be handed over.
    pub fn unmigrated_chains(&self) -> impl Iterator<Item = (ChainId, ChainMigration)> + '_ {
        self.chains
            .iter()
            .filter(|(_, s)| **s != ChainMigration::Migrated)
            .map(|(c, s)| (*c, *s))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRegistry {
    chains: BTreeMap<ChainId, ChainInfo>,
    vaults: BTreeMap<Hash256, VaultRecord>,
    elections: BTreeMap<Epoch, VaultRecord>,
    epochs: BTreeMap<Epoch, Hash256>,
    active: Option<Hash256>,
    retiring: Option<Hash256>,
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- chains -------------------------------------------------------------

    /// Registers a foreign chain. New chains go straight to the active
    /// vault; there is nothing on them to migrate.
    pub fn register_chain(&mut self, info: ChainInfo) -> Result<(), VaultError> {
        if self.chains.contains_key(&info.chain) {
            return Err(VaultError::ChainAlreadyRegistered(info.chain));
        }
        let chain = info.chain;
        self.chains.insert(chain, info);
        if let Some(active) = self.active.and_then(|key| self.vaults.get_mut(&key)) {
            active.chains.insert(chain, ChainMigration::Assigned);
        }
        info!(chain, "chain registered");
        Ok(())
    }

    pub fn chain(&self, chain: ChainId) -> Result<&ChainInfo, VaultError> {
        self.chains.get(&chain).ok_or(VaultError::UnknownChain(chain))
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainInfo> {
        self.chains.values()
    }

    // -- elections ----------------------------------------------------------

    /// Opens key generation for `epoch` with the given committee.
    ///
    /// A pending election blocks a new one for the same epoch until it
    /// fails or its window lapses.
    pub fn begin_election(
        &mut self,
        epoch: Epoch,
        members: Vec<Address>,
        block: BlockNumber,
        window: BlockNumber,
    ) -> Result<&VaultRecord, VaultError> {
        if members.is_empty() {
            return Err(VaultError::EmptyCommittee(epoch));
        }
        let mut seen = BTreeSet::new();
        for member in &members {
            if !seen.insert(*member) {
                return Err(VaultError::DuplicateMember(*member));
            }
        }
        if let Some(key) = self.epochs.get(&epoch) {
            if *key != ELECTION_PENDING_KEY {
                return Err(VaultError::EpochAlreadyKeyed(epoch));
            }
        }
        if let Some(existing) = self.elections.get(&epoch) {
            let open = existing.status == VaultStatus::KeygenPending
                && block <= existing.elected_at.saturating_add(window);
            if open {
                return Err(VaultError::ElectionInProgress(epoch));
            }
        }

        let record = VaultRecord {
            key: ELECTION_PENDING_KEY,
            epoch,
            status: VaultStatus::KeygenPending,
            pubkey: Vec::new(),
            members: seen.into_iter().collect(),
            elected_at: block,
            keygen_at: None,
            activated_at: None,
            retiring_at: None,
            retired_at: None,
            chains: BTreeMap::new(),
        };
        self.epochs.insert(epoch, ELECTION_PENDING_KEY);
        info!(epoch, members = record.members.len(), block, "election started");
        self.elections.insert(epoch, record);
        self.elections
            .get(&epoch)
            .ok_or(VaultError::NoPendingElection(epoch))
    }

    pub fn election(&self, epoch: Epoch) -> Option<&VaultRecord> {
        self.elections.get(&epoch)
    }

    /// Records a successful key generation and files the vault under its
    /// permanent key.
    pub fn complete_keygen(
        &mut self,
        epoch: Epoch,
        pubkey: &[u8],
        block: BlockNumber,
    ) -> Result<Hash256, VaultError> {
        let key = vault_key(pubkey);
        if self.vaults.contains_key(&key) {
            return Err(VaultError::DuplicateVault(key));
        }
        let mut record = self
            .elections
            .remove(&epoch)
            .ok_or(VaultError::NoPendingElection(epoch))?;
        if record.status != VaultStatus::KeygenPending {
            return Err(VaultError::InvalidState {
                key: record.key,
                expected: VaultStatus::KeygenPending,
                actual: record.status,
            });
        }
        record.key = key;
        record.pubkey = pubkey.to_vec();
        record.status = VaultStatus::KeygenCompleted;
        record.keygen_at = Some(block);
        self.vaults.insert(key, record);
        self.epochs.insert(epoch, key);
        info!(epoch, vault = %key, "key generation completed");
        Ok(key)
    }

    /// Marks the pending election for `epoch` as failed.
    pub fn fail_keygen(&mut self, epoch: Epoch, block: BlockNumber) -> Result<(), VaultError> {
        let record = self
            .elections
            .get_mut(&epoch)
            .ok_or(VaultError::NoPendingElection(epoch))?;
        if record.status != VaultStatus::KeygenPending {
            return Err(VaultError::InvalidState {
                key: record.key,
                expected: VaultStatus::KeygenPending,
                actual: record.status,
            });
        }
        record.status = VaultStatus::KeygenFailed;
        record.keygen_at = Some(block);
        info!(epoch, "key generation failed");
        Ok(())
    }

    // -- rotation -----------------------------------------------------------

    /// Promotes the vault with public key `incoming` to active.
    ///
    /// `outgoing` must name the current active vault (or be `None` when
    /// bootstrapping the first vault). The outgoing vault becomes retiring
    /// and keeps custody of its chains until they are migrated.
    pub fn rotate(
        &mut self,
        outgoing: Option<&[u8]>,
        incoming: &[u8],
        block: BlockNumber,
    ) -> Result<Hash256, VaultError> {
        if self.retiring.is_some() {
            return Err(VaultError::MigrationInProgress);
        }
        let outgoing_key = outgoing.map(vault_key);
        if outgoing_key != self.active {
            return Err(VaultError::VaultMismatch {
                expected: self.active,
                got: outgoing_key,
            });
        }
        let incoming_key = vault_key(incoming);
        let status = self
            .vaults
            .get(&incoming_key)
            .map(|r| r.status)
            .ok_or(VaultError::UnknownVault(incoming_key))?;
        if status != VaultStatus::KeygenCompleted {
            return Err(VaultError::InvalidState {
                key: incoming_key,
                expected: VaultStatus::KeygenCompleted,
                actual: status,
            });
        }

        let all_chains: BTreeMap<ChainId, ChainMigration> = self
            .chains
            .keys()
            .map(|c| (*c, ChainMigration::Assigned))
            .collect();

        if let Some(key) = outgoing_key {
            let record = self.vaults.get_mut(&key).ok_or(VaultError::UnknownVault(key))?;
            record.status = VaultStatus::Retiring;
            record.retiring_at = Some(block);
            for state in record.chains.values_mut() {
                *state = ChainMigration::Assigned;
            }
            self.retiring = Some(key);
        }

        let record = self
            .vaults
            .get_mut(&incoming_key)
            .ok_or(VaultError::UnknownVault(incoming_key))?;
        record.status = VaultStatus::Active;
        record.activated_at = Some(block);
        if outgoing_key.is_none() {
            record.chains = all_chains;
        }
        self.active = Some(incoming_key);
        info!(active = %incoming_key, retiring = ?outgoing_key, block, "vault rotated");
        Ok(incoming_key)
    }

    /// Flags the retiring vault as actively migrating.
    pub fn mark_migrating(&mut self) {
        if let Some(record) = self.retiring.and_then(|key| self.vaults.get_mut(&key)) {
            if record.status == VaultStatus::Retiring {
                record.status = VaultStatus::Migrating;
            }
        }
    }

    pub fn set_chain_migrating(&mut self, chain: ChainId) -> Result<(), VaultError> {
        let key = self.retiring.ok_or(VaultError::ChainNotMigrating(chain))?;
        let record = self.vaults.get_mut(&key).ok_or(VaultError::UnknownVault(key))?;
        match record.chains.get_mut(&chain) {
            Some(state) if *state != ChainMigration::Migrated => {
                *state = ChainMigration::Migrating;
                Ok(())
            }
            _ => Err(VaultError::ChainNotMigrating(chain)),
        }
    }

    /// Hands `chain` from the retiring vault to the active one.
    pub fn complete_chain_migration(&mut self, chain: ChainId) -> Result<(), VaultError> {
        let retiring = self.retiring.ok_or(VaultError::ChainNotMigrating(chain))?;
        let active = self.active.ok_or(VaultError::NoActiveVault)?;
        let record = self
            .vaults
            .get_mut(&retiring)
            .ok_or(VaultError::UnknownVault(retiring))?;
        match record.chains.get_mut(&chain) {
            Some(state) if *state != ChainMigration::Migrated => *state = ChainMigration::Migrated,
            _ => return Err(VaultError::ChainNotMigrating(chain)),
        }
        let record = self
            .vaults
            .get_mut(&active)
            .ok_or(VaultError::UnknownVault(active))?;
        record.chains.insert(chain, ChainMigration::Assigned);
        info!(chain, from = %retiring, to = %active, "chain migrated");
        Ok(())
    }

    /// Whether every chain of the retiring vault has been handed over.
    /// Trivially true when nothing is retiring.
    pub fn check_migration(&self) -> bool {
        self.retiring()
            .map(|r| r.unmigrated_chains().next().is_none())
            .unwrap_or(true)
    }

    /// Retires the outgoing vault once all its chains are migrated.
    pub fn finish_retirement(&mut self, block: BlockNumber) -> Result<Hash256, VaultError> {
        if !self.check_migration() {
            return Err(VaultError::MigrationInProgress);
        }
        let key = self.retiring.take().ok_or(VaultError::NoActiveVault)?;
        let record = self.vaults.get_mut(&key).ok_or(VaultError::UnknownVault(key))?;
        record.status = VaultStatus::Retired;
        record.retired_at = Some(block);
        info!(vault = %key, block, "vault retired");
        Ok(key)
    }

    // -- queries ------------------------------------------------------------

    /// The vault currently responsible for `chain`: the retiring vault
    /// until the chain is migrated, the active vault afterwards.
    pub fn vault_for_chain(&self, chain: ChainId) -> Result<&VaultRecord, VaultError> {
        if !self.chains.contains_key(&chain) {
            return Err(VaultError::UnknownChain(chain));
        }
        if let Some(retiring) = self.retiring() {
            if matches!(
                retiring.chains.get(&chain),
                Some(ChainMigration::Assigned | ChainMigration::Migrating)
            ) {
                return Ok(retiring);
            }
        }
        let active = self.active().ok_or(VaultError::NoActiveVault)?;
        debug!(chain, vault = %active.key, "chain custodian resolved");
        Ok(active)
    }

    pub fn active(&self) -> Option<&VaultRecord> {
        self.active.and_then(|key| self.vaults.get(&key))
    }

    pub fn retiring(&self) -> Option<&VaultRecord> {
        self.retiring.and_then(|key| self.vaults.get(&key))
    }

    pub fn vault(&self, key: &Hash256) -> Option<&VaultRecord> {
        self.vaults.get(key)
    }

    /// Key for an epoch: the vault key, [`ELECTION_PENDING_KEY`] during key
    /// generation, `None` if never elected.
    pub fn epoch_key(&self, epoch: Epoch) -> Option<Hash256> {
        self.epochs.get(&epoch).copied()
    }

    /// Record for an epoch, pending or completed.
    pub fn epoch_record(&self, epoch: Epoch) -> Option<&VaultRecord> {
        match self.epochs.get(&epoch) {
            Some(key) if *key == ELECTION_PENDING_KEY => self.elections.get(&epoch),
            Some(key) => self.vaults.get(key),
            None => None,
        }
    }

    pub fn status(&self, key: &Hash256) -> VaultStatus {
        self.vaults
            .get(key)
            .map(|r| r.status)
            .unwrap_or(VaultStatus::Unknown)
    }

    /// Per-chain migration progress of the retiring vault.
    pub fn migration_progress(&self) -> Vec<(ChainId, ChainMigration)> {
        self.retiring()
            .map(|r| r.chains.iter().map(|(c, s)| (*c, *s)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkeeper_protocol::crypto::CommitteeKeypair;

    fn members(n: u8) -> Vec<Address> {
        (1..=n).map(Address::repeat_byte).collect()
    }

    fn registry_with_chains() -> VaultRegistry {
        let mut registry = VaultRegistry::new();
        registry
            .register_chain(ChainInfo {
                chain: 1,
                kind: ChainKind::Contract,
            })
            .unwrap();
        registry
            .register_chain(ChainInfo {
                chain: 2,
                kind: ChainKind::Custodial {
                    gas_token: TokenId::repeat_byte(0xee),
                    gas_reserve: 5,
                },
            })
            .unwrap();
        registry
    }

    fn keyed(registry: &mut VaultRegistry, epoch: Epoch, label: &str) -> Vec<u8> {
        let pubkey = CommitteeKeypair::from_label(label).unwrap().public_key();
        registry.begin_election(epoch, members(4), 10, 100).unwrap();
        registry.complete_keygen(epoch, &pubkey, 20).unwrap();
        pubkey
    }

    #[test]
    fn election_records_sorted_members() {
        let mut registry = VaultRegistry::new();
        let mut committee = members(3);
        committee.reverse();
        let record = registry.begin_election(1, committee, 5, 100).unwrap();
        assert_eq!(record.members, members(3));
        assert_eq!(record.status, VaultStatus::KeygenPending);
        assert_eq!(registry.epoch_key(1), Some(ELECTION_PENDING_KEY));
    }

    #[test]
    fn election_rejects_bad_committees() {
        let mut registry = VaultRegistry::new();
        assert_eq!(
            registry.begin_election(1, vec![], 0, 10).unwrap_err(),
            VaultError::EmptyCommittee(1)
        );
        let dup = vec![Address::repeat_byte(1), Address::repeat_byte(1)];
        assert!(matches!(
            registry.begin_election(1, dup, 0, 10),
            Err(VaultError::DuplicateMember(_))
        ));
    }

    #[test]
    fn re_election_only_after_failure_or_expiry() {
        let mut registry = VaultRegistry::new();
        registry.begin_election(1, members(4), 0, 10).unwrap();
        assert_eq!(
            registry.begin_election(1, members(4), 5, 10).unwrap_err(),
            VaultError::ElectionInProgress(1)
        );
        registry.begin_election(1, members(4), 11, 10).unwrap();
        registry.fail_keygen(1, 12).unwrap();
        registry.begin_election(1, members(4), 13, 10).unwrap();
    }

    #[test]
    fn bootstrap_rotation_assigns_all_chains() {
        let mut registry = registry_with_chains();
        let pubkey = keyed(&mut registry, 1, "vault-1");
        let key = registry.rotate(None, &pubkey, 30).unwrap();

        let active = registry.active().unwrap();
        assert_eq!(active.key, key);
        assert_eq!(active.status, VaultStatus::Active);
        assert_eq!(active.chains.len(), 2);
        assert!(registry.retiring().is_none());
        assert!(registry.check_migration());
    }

    #[test]
    fn rotation_hands_custody_over_chain_by_chain() {
        let mut registry = registry_with_chains();
        let old = keyed(&mut registry, 1, "vault-1");
        registry.rotate(None, &old, 30).unwrap();
        let new = keyed(&mut registry, 2, "vault-2");
        registry.rotate(Some(&old), &new, 40).unwrap();

        let old_key = vault_key(&old);
        let new_key = vault_key(&new);
        assert_eq!(registry.status(&old_key), VaultStatus::Retiring);
        assert_eq!(registry.vault_for_chain(1).unwrap().key, old_key);

        registry.complete_chain_migration(1).unwrap();
        assert_eq!(registry.vault_for_chain(1).unwrap().key, new_key);
        assert_eq!(registry.vault_for_chain(2).unwrap().key, old_key);
        assert!(!registry.check_migration());

        registry.complete_chain_migration(2).unwrap();
        assert!(registry.check_migration());
        registry.finish_retirement(50).unwrap();
        assert_eq!(registry.status(&old_key), VaultStatus::Retired);
        assert!(registry.retiring().is_none());
    }

    #[test]
    fn rotation_requires_matching_outgoing_vault() {
        let mut registry = registry_with_chains();
        let first = keyed(&mut registry, 1, "vault-1");
        registry.rotate(None, &first, 30).unwrap();
        let second = keyed(&mut registry, 2, "vault-2");
        assert!(matches!(
            registry.rotate(None, &second, 40),
            Err(VaultError::VaultMismatch { .. })
        ));
    }

    #[test]
    fn rotation_blocked_while_migrating() {
        let mut registry = registry_with_chains();
        let a = keyed(&mut registry, 1, "vault-1");
        registry.rotate(None, &a, 30).unwrap();
        let b = keyed(&mut registry, 2, "vault-2");
        registry.rotate(Some(&a), &b, 40).unwrap();
        let c = keyed(&mut registry, 3, "vault-3");
        assert_eq!(
            registry.rotate(Some(&b), &c, 50).unwrap_err(),
            VaultError::MigrationInProgress
        );
    }

    #[test]
    fn rotation_requires_completed_keygen() {
        let mut registry = registry_with_chains();
        let a = keyed(&mut registry, 1, "vault-1");
        registry.rotate(None, &a, 30).unwrap();
        let unknown = CommitteeKeypair::from_label("nobody").unwrap().public_key();
        assert!(matches!(
            registry.rotate(Some(&a), &unknown, 40),
            Err(VaultError::UnknownVault(_))
        ));
        // An active vault cannot be rotated in again.
        assert!(matches!(
            registry.rotate(Some(&a), &a, 40),
            Err(VaultError::InvalidState { .. })
        ));
    }

    #[test]
    fn chain_registered_mid_rotation_goes_to_active() {
        let mut registry = registry_with_chains();
        let a = keyed(&mut registry, 1, "vault-1");
        registry.rotate(None, &a, 30).unwrap();
        let b = keyed(&mut registry, 2, "vault-2");
        registry.rotate(Some(&a), &b, 40).unwrap();
        registry
            .register_chain(ChainInfo {
                chain: 3,
                kind: ChainKind::Contract,
            })
            .unwrap();
        assert_eq!(registry.vault_for_chain(3).unwrap().key, vault_key(&b));
    }
}
