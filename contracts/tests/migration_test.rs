//! End-to-end rotation: a second vault takes over, funds migrate chain by
//! chain, and the outgoing vault retires.

mod common;

use common::*;
use vaultkeeper_contracts::events::{Event, OrderKind, OutboundOrder};
use vaultkeeper_contracts::migration::MigrationStep;
use vaultkeeper_contracts::tss::ConsensusError;
use vaultkeeper_contracts::vault::{ChainMigration, VaultError, VaultStatus};
use vaultkeeper_contracts::{Command, EngineError, Outcome, Receipt};
use vaultkeeper_protocol::crypto::vault_key;
use vaultkeeper_protocol::{Address, Amount, ChainId, TokenId};

fn step(receipt: &Receipt) -> MigrationStep {
    match &receipt.outcome {
        Outcome::Migration(report) => report.step,
        other => panic!("expected a migration report, got {other:?}"),
    }
}

fn tranche(receipt: &Receipt) -> (ChainId, TokenId, Amount, u8) {
    match step(receipt) {
        MigrationStep::Tranche {
            chain,
            token,
            amount,
            index,
            ..
        } => (chain, token, amount, index),
        other => panic!("expected a tranche, got {other:?}"),
    }
}

/// First vault funded on both chains, second vault keyed and rotated in.
struct Rotated {
    h: Harness,
    old_committee: Vec<Address>,
    new_committee: Vec<Address>,
    old_pubkey: Vec<u8>,
    new_pubkey: Vec<u8>,
}

fn rotated() -> Rotated {
    let old_committee = members(1, 4);
    let new_committee = members(11, 4);
    let mut h = Harness::new();
    let old_pubkey = h.bootstrap(&old_committee);

    let relay = relay_chain();
    h.deposit(&old_committee, tx_in(1, BTC, relay, usdc(), 900));
    h.deposit(&old_committee, tx_in(2, BTC, relay, gas(), 1_000));
    h.deposit(&old_committee, tx_in(3, ETH, relay, usdc(), 500));

    h.advance(1);
    let new_pubkey = h.keygen(2, &new_committee, "vault-2");
    let receipt = h
        .orchestrate(Command::Rotate {
            retiring: Some(old_pubkey.clone()),
            active: new_pubkey.clone(),
        })
        .unwrap();
    assert_eq!(
        receipt.outcome,
        Outcome::Rotated {
            active: vault_key(&new_pubkey),
            retiring: Some(vault_key(&old_pubkey)),
        }
    );

    Rotated {
        h,
        old_committee,
        new_committee,
        old_pubkey,
        new_pubkey,
    }
}

fn migration_orders(h: &Harness) -> Vec<OutboundOrder> {
    h.relay
        .outbound()
        .into_iter()
        .filter(|o| o.kind == OrderKind::Migration)
        .collect()
}

#[test]
fn full_rotation_migrates_and_retires() {
    let Rotated {
        mut h,
        old_committee,
        new_committee,
        old_pubkey,
        new_pubkey,
    } = rotated();
    let old_key = vault_key(&old_pubkey);
    let new_key = vault_key(&new_pubkey);
    let vaults = h.core.state().vaults();
    assert_eq!(vaults.status(&old_key), VaultStatus::Retiring);
    assert_eq!(vaults.status(&new_key), VaultStatus::Active);

    // Contract chains are flipped first, in chain order.
    let first = h.heartbeat();
    assert_eq!(step(&first), MigrationStep::ContractFlip { chain: ETH });
    assert!(first.events.contains(&Event::ContractMigrationRequested {
        chain: ETH,
        from: old_key,
        to: new_key,
    }));
    assert_eq!(h.core.state().vaults().status(&old_key), VaultStatus::Migrating);

    // Custodial chain: USDC in three even tranches, then gas minus the
    // reserve kept back to pay for the transfers.
    let expected = [
        (usdc(), 300, 0),
        (usdc(), 300, 1),
        (usdc(), 300, 2),
        (gas(), 316, 0),
        (gas(), 317, 1),
        (gas(), 317, 2),
    ];
    for (token, amount, index) in expected {
        let receipt = h.heartbeat();
        assert_eq!(tranche(&receipt), (BTC, token, amount, index));
    }
    assert_eq!(step(&h.heartbeat()), MigrationStep::Waiting);
    assert_eq!(h.chain_balance(&usdc(), BTC), (900, 900));
    assert_eq!(h.chain_balance(&gas(), BTC), (1_000, 950));

    let orders = migration_orders(&h);
    assert_eq!(orders.len(), 6);
    let target = h
        .core
        .state()
        .vaults()
        .active()
        .unwrap()
        .address()
        .unwrap();
    for order in &orders {
        assert_eq!(order.vault, old_key);
        assert_eq!(order.chain, BTC);
        assert_eq!(order.to, target.as_bytes().to_vec());
    }

    // Only the outgoing committee signs migration transfers.
    let err = h
        .submit(new_committee[0], Command::VoteTxOut(tx_out(&orders[0])))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Consensus(ConsensusError::UnknownVoter { .. })
    ));
    for order in &orders {
        h.confirm(&old_committee, order);
    }
    assert_eq!(h.core.state().outbound().count(), 0);

    let handover = h.heartbeat();
    assert_eq!(step(&handover), MigrationStep::ChainMigrated { chain: BTC });
    assert_eq!(h.chain_balance(&usdc(), BTC), (900, 0));
    assert_eq!(h.chain_balance(&gas(), BTC), (1_000, 0));
    let pair = h
        .core
        .state()
        .ledger()
        .chain_token(&gas(), BTC)
        .unwrap();
    assert_eq!(pair.migrated, 0);
    assert_eq!(pair.migration_index, 0);
    assert_eq!(
        h.core.state().vaults().vault_for_chain(BTC).unwrap().key,
        new_key
    );
    h.core.state().ledger().check_invariants().unwrap();

    // The contract chain still waits for its flip.
    assert_eq!(step(&h.heartbeat()), MigrationStep::Waiting);
    assert_eq!(
        h.core.state().vaults().migration_progress(),
        vec![
            (ETH, ChainMigration::Migrating),
            (BTC, ChainMigration::Migrated)
        ]
    );
    h.advance(1);
    let confirmed = h
        .orchestrate(Command::ConfirmContractMigration { chain: ETH })
        .unwrap();
    assert_eq!(confirmed.outcome, Outcome::ContractMigrated { chain: ETH });
    assert!(confirmed.events.contains(&Event::ChainMigrated { chain: ETH }));

    let retired = h.heartbeat();
    assert_eq!(step(&retired), MigrationStep::Retired { vault: old_key });
    assert!(retired.events.contains(&Event::VaultRetired { vault: old_key }));
    assert_eq!(h.core.state().vaults().status(&old_key), VaultStatus::Retired);
    assert!(h.core.state().vaults().retiring().is_none());
    assert_eq!(step(&h.heartbeat()), MigrationStep::Idle);

    // The new committee now custodies both chains.
    let receipt = h.deposit(&new_committee, tx_in(9, ETH, relay_chain(), usdc(), 40));
    assert_eq!(receipt.sequence + 1, h.core.state().sequence());
    assert_eq!(h.chain_balance(&usdc(), ETH), (540, 0));
}

#[test]
fn old_committee_keeps_custody_until_handover() {
    let Rotated {
        mut h,
        old_committee,
        new_committee,
        ..
    } = rotated();
    h.heartbeat();

    let deposit = tx_in(7, ETH, relay_chain(), usdc(), 25);
    let err = h
        .submit(new_committee[0], Command::VoteTxIn(deposit.clone()))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Consensus(ConsensusError::UnknownVoter { .. })
    ));
    h.deposit(&old_committee, deposit);
    assert_eq!(h.chain_balance(&usdc(), ETH), (525, 0));
}

#[test]
fn second_rotation_waits_for_migration() {
    let Rotated {
        mut h, new_pubkey, ..
    } = rotated();
    let err = h
        .orchestrate(Command::Rotate {
            retiring: Some(new_pubkey.clone()),
            active: new_pubkey,
        })
        .unwrap_err();
    assert_eq!(err, EngineError::Vault(VaultError::MigrationInProgress));
}

#[test]
fn contract_confirmation_requires_requested_flip() {
    let Rotated { mut h, .. } = rotated();
    let err = h
        .orchestrate(Command::ConfirmContractMigration { chain: ETH })
        .unwrap_err();
    assert_eq!(err, EngineError::Vault(VaultError::ChainNotMigrating(ETH)));

    h.heartbeat();
    let err = h
        .orchestrate(Command::ConfirmContractMigration { chain: BTC })
        .unwrap_err();
    assert_eq!(err, EngineError::Vault(VaultError::ChainNotMigrating(BTC)));
    h.orchestrate(Command::ConfirmContractMigration { chain: ETH })
        .unwrap();
}

#[test]
fn dust_is_left_behind() {
    let committee = members(1, 4);
    let mut h = Harness::new();
    let old_pubkey = h.bootstrap(&committee);
    // Ten units of USDC is exactly the dust threshold; the gas balance
    // does not exceed the reserve.
    h.deposit(&committee, tx_in(1, BTC, relay_chain(), usdc(), 10));
    h.deposit(&committee, tx_in(2, BTC, relay_chain(), gas(), GAS_RESERVE));
    h.advance(1);
    let new_pubkey = h.keygen(2, &members(11, 4), "vault-2");
    h.orchestrate(Command::Rotate {
        retiring: Some(old_pubkey),
        active: new_pubkey,
    })
    .unwrap();

    assert_eq!(step(&h.heartbeat()), MigrationStep::ContractFlip { chain: ETH });
    assert_eq!(step(&h.heartbeat()), MigrationStep::ChainMigrated { chain: BTC });
    assert!(migration_orders(&h).is_empty());
    assert_eq!(h.chain_balance(&usdc(), BTC), (10, 0));
}

#[test]
fn heartbeat_prunes_stale_proposals() {
    let committee = members(1, 4);
    let mut h = Harness::new();
    h.bootstrap(&committee);
    // One vote on a deposit that never reaches a quorum.
    h.submit(
        committee[0],
        Command::VoteTxIn(tx_in(5, BTC, relay_chain(), usdc(), 100)),
    )
    .unwrap();
    assert_eq!(h.core.slash_points(&committee[0]), 1);

    h.advance(h.core.config().proposal_ttl_blocks);
    let receipt = h.heartbeat();
    assert_eq!(step(&receipt), MigrationStep::Idle);
    assert!(receipt.events.iter().any(|e| matches!(
        e,
        Event::ProposalsPruned { expired, .. } if *expired >= 1
    )));
    // An abandoned vote keeps its penalty.
    assert_eq!(h.core.slash_points(&committee[0]), 1);
}
