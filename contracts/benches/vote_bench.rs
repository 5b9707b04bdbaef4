// Engine benchmarks for Vaultkeeper.
//
// Covers deposit finalization across committee sizes, rebalance quoting and
// key-generation vote verification.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use vaultkeeper_contracts::ledger::BalanceLedger;
use vaultkeeper_contracts::rebalance::{quote, Movement};
use vaultkeeper_contracts::tss::{KeygenVote, TxIn};
use vaultkeeper_contracts::vault::ChainKind;
use vaultkeeper_contracts::{Command, Core, Envelope, MemoryMaintainers, RecordingRelay};
use vaultkeeper_protocol::config::{EngineConfig, FeeConfig};
use vaultkeeper_protocol::crypto::{recover_signer, vault_key, CommitteeKeypair};
use vaultkeeper_protocol::{Address, Hash256, TokenId};

const ORCHESTRATOR: Address = Address::repeat_byte(0xaa);
const TOKEN: TokenId = TokenId::repeat_byte(0x10);

/// An engine with one active vault run by `n` members and two chains.
fn setup_core(n: u8) -> (Core, Vec<Address>) {
    let config = EngineConfig {
        orchestrator: ORCHESTRATOR,
        ..EngineConfig::default()
    };
    let maintainers = MemoryMaintainers::new();
    let committee: Vec<Address> = (1..=n).map(Address::repeat_byte).collect();
    maintainers.set_committee(1, committee.clone());
    let mut core = Core::new(
        config,
        Box::new(maintainers),
        Box::new(RecordingRelay::new()),
    );

    let keypair = CommitteeKeypair::from_label("bench-vault").unwrap();
    let pubkey = keypair.public_key();
    let vote = KeygenVote {
        epoch: 1,
        members: committee.clone(),
        blames: vec![],
        pubkey: pubkey.clone(),
        signature: keypair.sign_digest(&vault_key(&pubkey)),
    };

    let mut apply = |sender: Address, command: Command| {
        core.apply(&Envelope {
            block: 1,
            sender,
            command,
        })
        .unwrap();
    };
    for chain in [1, 2] {
        apply(
            ORCHESTRATOR,
            Command::RegisterChain {
                chain,
                kind: ChainKind::Contract,
            },
        );
        apply(
            ORCHESTRATOR,
            Command::ConfigureToken {
                token: TOKEN,
                chain,
                weight: 50,
                min_amount: 0,
            },
        );
    }
    apply(ORCHESTRATOR, Command::Elect { epoch: 1 });
    for member in &committee {
        apply(*member, Command::VoteKeygen(vote.clone()));
    }
    apply(
        ORCHESTRATOR,
        Command::Rotate {
            retiring: None,
            active: pubkey,
        },
    );
    (core, committee)
}

fn deposit(order: u64) -> TxIn {
    let mut id = [0u8; 32];
    id[..8].copy_from_slice(&order.to_be_bytes());
    TxIn {
        order_id: Hash256::new(id),
        from_chain: 1,
        to_chain: EngineConfig::default().relay_chain,
        token: TOKEN,
        amount: 1_000,
        from: vec![1; 20],
        to: vec![2; 20],
        payload: vec![],
        height: order,
    }
}

fn bench_deposit_finalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/deposit_finalize");

    for committee_size in [4u8, 7, 13, 21] {
        group.throughput(Throughput::Elements(committee_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(committee_size),
            &committee_size,
            |b, &n| {
                let (mut core, committee) = setup_core(n);
                let mut order = 0u64;
                b.iter(|| {
                    order += 1;
                    let tx = deposit(order);
                    for member in &committee {
                        core.apply(&Envelope {
                            block: 2,
                            sender: *member,
                            command: Command::VoteTxIn(tx.clone()),
                        })
                        .unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_rebalance_quote(c: &mut Criterion) {
    let mut ledger = BalanceLedger::new();
    for chain in 1..=8u64 {
        ledger.configure(TOKEN, chain, 10 + chain, 0).unwrap();
        ledger.credit(&TOKEN, chain, 1_000_000 * chain as u128).unwrap();
    }
    let state = ledger.token(&TOKEN).unwrap().clone();
    let config = FeeConfig::default();
    let movement = Movement {
        inflow: Some(1),
        outflow: Some(8),
        amount: 250_000,
    };

    c.bench_function("engine/rebalance_quote", |b| {
        b.iter(|| quote(&config, &state, &movement));
    });
}

fn bench_keygen_signature(c: &mut Criterion) {
    let keypair = CommitteeKeypair::from_label("bench-vault").unwrap();
    let digest = vault_key(&keypair.public_key());
    let signature = keypair.sign_digest(&digest);

    c.bench_function("engine/keygen_signature_recover", |b| {
        b.iter(|| recover_signer(&digest, &signature).unwrap());
    });
}

criterion_group!(
    benches,
    bench_deposit_finalization,
    bench_rebalance_quote,
    bench_keygen_signature,
);
criterion_main!(benches);
