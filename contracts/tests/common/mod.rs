//! Shared fixtures for the engine integration tests.
//!
//! Committees are plain addresses: the engine trusts the envelope sender,
//! so tests vote by naming the member directly.

#![allow(dead_code)]

use vaultkeeper_contracts::events::{Event, OutboundOrder};
use vaultkeeper_contracts::tss::{KeygenVote, TxIn, TxOut, VoteOutcome};
use vaultkeeper_contracts::vault::ChainKind;
use vaultkeeper_contracts::{
    Command, Core, EngineError, Envelope, MemoryMaintainers, Outcome, Receipt, RecordingRelay,
};
use vaultkeeper_protocol::config::{EngineConfig, FeeConfig};
use vaultkeeper_protocol::crypto::{vault_key, CommitteeKeypair};
use vaultkeeper_protocol::{Address, Amount, BlockNumber, ChainId, Epoch, Hash256, TokenId};

/// Contract-custody chain.
pub const ETH: ChainId = 1;
/// Key-custody chain with its own gas token.
pub const BTC: ChainId = 2;
pub const GAS_RESERVE: Amount = 50;

pub fn relay_chain() -> ChainId {
    EngineConfig::default().relay_chain
}

pub fn usdc() -> TokenId {
    TokenId::repeat_byte(0x10)
}

pub fn gas() -> TokenId {
    TokenId::repeat_byte(0x20)
}

pub fn orchestrator() -> Address {
    Address::repeat_byte(0xaa)
}

/// `n` member addresses starting at byte `start`.
pub fn members(start: u8, n: u8) -> Vec<Address> {
    (start..start + n).map(Address::repeat_byte).collect()
}

pub fn zero_fees() -> FeeConfig {
    FeeConfig {
        max_fee_rate_ppm: 0,
        max_incentive_rate_ppm: 0,
        small_transfer_ppm: 0,
        small_transfer_rate_ppm: 0,
    }
}

/// A successful keygen vote for the key derived from `label`.
pub fn success_vote(epoch: Epoch, committee: &[Address], label: &str) -> KeygenVote {
    let keypair = CommitteeKeypair::from_label(label).expect("label key");
    let pubkey = keypair.public_key();
    let signature = keypair.sign_digest(&vault_key(&pubkey));
    KeygenVote {
        epoch,
        members: committee.to_vec(),
        blames: vec![],
        pubkey,
        signature,
    }
}

pub fn blame_vote(epoch: Epoch, committee: &[Address], blamed: &[Address]) -> KeygenVote {
    KeygenVote {
        epoch,
        members: committee.to_vec(),
        blames: blamed.to_vec(),
        pubkey: vec![],
        signature: vec![],
    }
}

pub fn tx_in(order: u8, from_chain: ChainId, to_chain: ChainId, token: TokenId, amount: Amount) -> TxIn {
    TxIn {
        order_id: Hash256::repeat_byte(order),
        from_chain,
        to_chain,
        token,
        amount,
        from: vec![0xf0, order],
        to: vec![0x70, order],
        payload: vec![],
        height: 1_000 + order as u64,
    }
}

pub fn tx_out(order: &OutboundOrder) -> TxOut {
    TxOut {
        order_id: order.order_id,
        chain: order.chain,
        token: order.token,
        amount: order.amount,
        tx_hash: order.order_id.as_bytes().to_vec(),
    }
}

pub fn vote_outcome(receipt: &Receipt) -> VoteOutcome {
    match &receipt.outcome {
        Outcome::Vote(outcome) => *outcome,
        other => panic!("expected a vote outcome, got {other:?}"),
    }
}

pub fn issued_orders(receipt: &Receipt) -> Vec<OutboundOrder> {
    receipt
        .events
        .iter()
        .filter_map(|e| match e {
            Event::OutboundIssued(order) => Some(order.clone()),
            _ => None,
        })
        .collect()
}

pub struct Harness {
    pub core: Core,
    pub maintainers: MemoryMaintainers,
    pub relay: RecordingRelay,
    pub block: BlockNumber,
}

impl Harness {
    /// Engine with fees switched off so amounts stay exact.
    pub fn new() -> Self {
        Self::with_fees(zero_fees())
    }

    pub fn with_fees(fees: FeeConfig) -> Self {
        let config = EngineConfig {
            orchestrator: orchestrator(),
            fees,
            ..EngineConfig::default()
        };
        let maintainers = MemoryMaintainers::new();
        let relay = RecordingRelay::new();
        let core = Core::new(
            config,
            Box::new(maintainers.clone()),
            Box::new(relay.clone()),
        );
        Self {
            core,
            maintainers,
            relay,
            block: 1,
        }
    }

    pub fn advance(&mut self, blocks: BlockNumber) {
        self.block += blocks;
    }

    pub fn submit(&mut self, sender: Address, command: Command) -> Result<Receipt, EngineError> {
        self.core.apply(&Envelope {
            block: self.block,
            sender,
            command,
        })
    }

    pub fn orchestrate(&mut self, command: Command) -> Result<Receipt, EngineError> {
        self.submit(orchestrator(), command)
    }

    pub fn heartbeat(&mut self) -> Receipt {
        self.advance(1);
        self.orchestrate(Command::MigrationHeartbeat)
            .expect("heartbeat")
    }

    /// ETH (contract custody) and BTC (key custody), with USDC on both and
    /// the gas token on BTC.
    pub fn setup_chains(&mut self) {
        self.orchestrate(Command::RegisterChain {
            chain: ETH,
            kind: ChainKind::Contract,
        })
        .unwrap();
        self.orchestrate(Command::RegisterChain {
            chain: BTC,
            kind: ChainKind::Custodial {
                gas_token: gas(),
                gas_reserve: GAS_RESERVE,
            },
        })
        .unwrap();
        for (token, chain, weight) in [(usdc(), ETH, 50), (usdc(), BTC, 50), (gas(), BTC, 100)] {
            self.orchestrate(Command::ConfigureToken {
                token,
                chain,
                weight,
                min_amount: 10,
            })
            .unwrap();
        }
    }

    /// Elects `committee` for `epoch` and has every member confirm the key
    /// derived from `label`. Returns the vault public key.
    pub fn keygen(&mut self, epoch: Epoch, committee: &[Address], label: &str) -> Vec<u8> {
        self.maintainers.set_committee(epoch, committee.to_vec());
        self.orchestrate(Command::Elect { epoch }).unwrap();
        let vote = success_vote(epoch, committee, label);
        for member in committee {
            self.submit(*member, Command::VoteKeygen(vote.clone()))
                .unwrap();
        }
        vote.pubkey
    }

    /// Chains set up and the first vault active. Returns its public key.
    pub fn bootstrap(&mut self, committee: &[Address]) -> Vec<u8> {
        self.setup_chains();
        let pubkey = self.keygen(1, committee, "vault-1");
        self.orchestrate(Command::Rotate {
            retiring: None,
            active: pubkey.clone(),
        })
        .unwrap();
        pubkey
    }

    /// Committee members vote on `tx` until it finalizes. Returns the
    /// finalizing receipt.
    pub fn deposit(&mut self, committee: &[Address], tx: TxIn) -> Receipt {
        for member in committee {
            let receipt = self
                .submit(*member, Command::VoteTxIn(tx.clone()))
                .unwrap();
            if matches!(vote_outcome(&receipt), VoteOutcome::Finalized { .. }) {
                return receipt;
            }
        }
        panic!("deposit never finalized");
    }

    /// Committee members confirm `order` until it finalizes.
    pub fn confirm(&mut self, committee: &[Address], order: &OutboundOrder) -> Receipt {
        let tx = tx_out(order);
        for member in committee {
            let receipt = self
                .submit(*member, Command::VoteTxOut(tx.clone()))
                .unwrap();
            if matches!(vote_outcome(&receipt), VoteOutcome::Finalized { .. }) {
                return receipt;
            }
        }
        panic!("confirmation never finalized");
    }

    pub fn chain_balance(&self, token: &TokenId, chain: ChainId) -> (i128, i128) {
        let pair = self
            .core
            .state()
            .ledger()
            .chain_token(token, chain)
            .expect("configured pair");
        (pair.balance, pair.pending_out)
    }
}
