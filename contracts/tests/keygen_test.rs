//! Integration tests for elections and key-generation voting.

mod common;

use common::*;
use vaultkeeper_contracts::interfaces::RelayCall;
use vaultkeeper_contracts::proposal::ProposalError;
use vaultkeeper_contracts::tss::{ConsensusError, VoteOutcome};
use vaultkeeper_contracts::vault::{VaultError, VaultStatus};
use vaultkeeper_contracts::{Command, EngineError, ErrorClass};
use vaultkeeper_protocol::config::ELECTION_PENDING_KEY;
use vaultkeeper_protocol::crypto::{vault_key, CommitteeKeypair};
use vaultkeeper_protocol::Address;

fn elected(committee: &[vaultkeeper_protocol::Address]) -> Harness {
    let mut h = Harness::new();
    h.maintainers.set_committee(1, committee.to_vec());
    h.orchestrate(Command::Elect { epoch: 1 }).unwrap();
    h
}

// ---------------------------------------------------------------------------
// Success path
// ---------------------------------------------------------------------------

#[test]
fn unanimous_keygen_creates_vault() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    assert_eq!(
        h.core.state().vaults().epoch_key(1),
        Some(ELECTION_PENDING_KEY)
    );

    let vote = success_vote(1, &committee, "vault-1");
    for (i, member) in committee.iter().enumerate() {
        let receipt = h
            .submit(*member, Command::VoteKeygen(vote.clone()))
            .unwrap();
        match vote_outcome(&receipt) {
            VoteOutcome::Pending { count, needed, .. } => {
                assert!(i < 3);
                assert_eq!(count as usize, i + 1);
                assert_eq!(needed, 4);
            }
            VoteOutcome::Finalized { .. } => assert_eq!(i, 3),
            other => panic!("unexpected {other:?}"),
        }
        if i == 2 {
            // Three of four is not enough for a key; voters carry the
            // temporary penalty meanwhile.
            assert_eq!(h.core.slash_points(&committee[0]), 1);
            assert_eq!(h.core.slash_points(&committee[3]), 0);
        }
    }

    let key = vault_key(&vote.pubkey);
    let vaults = h.core.state().vaults();
    assert_eq!(vaults.epoch_key(1), Some(key));
    assert_eq!(vaults.status(&key), VaultStatus::KeygenCompleted);
    assert_eq!(vaults.vault(&key).unwrap().members, committee);
    for member in &committee {
        assert_eq!(h.core.slash_points(member), 0);
    }
    assert!(h.relay.calls().contains(&RelayCall::Keygen {
        epoch: 1,
        success: true
    }));
}

#[test]
fn split_votes_never_finalize_and_keep_penalties() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    let a = success_vote(1, &committee, "key-a");
    let b = success_vote(1, &committee, "key-b");
    h.submit(committee[0], Command::VoteKeygen(a.clone())).unwrap();
    h.submit(committee[1], Command::VoteKeygen(a)).unwrap();
    h.submit(committee[2], Command::VoteKeygen(b.clone())).unwrap();
    h.submit(committee[3], Command::VoteKeygen(b)).unwrap();

    assert_eq!(
        h.core.state().vaults().epoch_key(1),
        Some(ELECTION_PENDING_KEY)
    );
    for member in &committee {
        assert_eq!(h.core.slash_points(member), 1);
    }
}

// ---------------------------------------------------------------------------
// Blame path
// ---------------------------------------------------------------------------

#[test]
fn blame_supermajority_fails_keygen_and_slashes() {
    let committee = members(1, 4);
    let blamed = committee[3];
    let mut h = elected(&committee);
    let vote = blame_vote(1, &committee, &[blamed]);

    let first = h.submit(committee[0], Command::VoteKeygen(vote.clone())).unwrap();
    assert!(matches!(
        vote_outcome(&first),
        VoteOutcome::Pending { needed: 3, .. }
    ));
    h.submit(committee[1], Command::VoteKeygen(vote.clone())).unwrap();
    let third = h.submit(committee[2], Command::VoteKeygen(vote.clone())).unwrap();
    assert!(matches!(vote_outcome(&third), VoteOutcome::Finalized { .. }));

    let record = h.core.state().vaults().epoch_record(1).unwrap();
    assert_eq!(record.status, VaultStatus::KeygenFailed);
    assert_eq!(h.core.slash_points(&blamed), 100);
    for voter in &committee[..3] {
        assert_eq!(h.core.slash_points(voter), 0);
    }
    assert!(h.relay.calls().contains(&RelayCall::Keygen {
        epoch: 1,
        success: false
    }));

    // The blamed member arrives too late.
    let err = h
        .submit(blamed, Command::VoteKeygen(success_vote(1, &committee, "late")))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Consensus(ConsensusError::ElectionClosed { epoch: 1, .. })
    ));

    // A failed election can be rerun.
    h.advance(1);
    h.orchestrate(Command::Elect { epoch: 1 }).unwrap();
    assert_eq!(
        h.core.state().vaults().epoch_record(1).unwrap().status,
        VaultStatus::KeygenPending
    );
}

#[test]
fn blamed_voter_keeps_vote_penalty() {
    let committee = members(1, 4);
    let blamed = committee[3];
    let mut h = elected(&committee);
    let vote = blame_vote(1, &committee, &[blamed]);

    h.submit(committee[0], Command::VoteKeygen(vote.clone())).unwrap();
    h.submit(blamed, Command::VoteKeygen(vote.clone())).unwrap();
    let last = h.submit(committee[1], Command::VoteKeygen(vote)).unwrap();
    assert!(matches!(vote_outcome(&last), VoteOutcome::Finalized { .. }));

    assert_eq!(h.core.slash_points(&blamed), 101);
    assert_eq!(h.core.slash_points(&committee[0]), 0);
    assert_eq!(h.core.slash_points(&committee[1]), 0);
    assert_eq!(h.core.slash_points(&committee[2]), 0);
}

#[test]
fn blaming_an_outsider_is_rejected() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    let err = h
        .submit(
            committee[0],
            Command::VoteKeygen(blame_vote(1, &committee, &[Address::repeat_byte(0x99)])),
        )
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Consensus(ConsensusError::InvalidBlame(Address::repeat_byte(0x99)))
    );
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[test]
fn votes_after_window_expire() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    h.advance(h.core.config().keygen_window_blocks + 1);
    let err = h
        .submit(
            committee[0],
            Command::VoteKeygen(success_vote(1, &committee, "vault-1")),
        )
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Expiry);

    // An expired election may be restarted.
    h.orchestrate(Command::Elect { epoch: 1 }).unwrap();
}

#[test]
fn election_in_progress_blocks_restart() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    h.advance(5);
    let err = h.orchestrate(Command::Elect { epoch: 1 }).unwrap_err();
    assert_eq!(err, EngineError::Vault(VaultError::ElectionInProgress(1)));
    assert_eq!(err.class(), ErrorClass::Conflict);
}

#[test]
fn forged_key_signature_rejected() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    let mut vote = success_vote(1, &committee, "vault-1");
    let impostor = CommitteeKeypair::from_label("impostor").unwrap();
    vote.signature = impostor.sign_digest(&vault_key(&vote.pubkey));
    let err = h
        .submit(committee[0], Command::VoteKeygen(vote))
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Consensus(ConsensusError::InvalidKeySignature)
    );
    assert_eq!(err.class(), ErrorClass::Validation);
}

#[test]
fn outsiders_cannot_vote() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    let err = h
        .submit(
            Address::repeat_byte(0x55),
            Command::VoteKeygen(success_vote(1, &committee, "vault-1")),
        )
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Access);
}

#[test]
fn member_list_must_match_election() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    let err = h
        .submit(
            committee[0],
            Command::VoteKeygen(success_vote(1, &committee[..3], "vault-1")),
        )
        .unwrap_err();
    assert_eq!(err, EngineError::Consensus(ConsensusError::MembersMismatch));
}

#[test]
fn double_vote_rejected_without_side_effects() {
    let committee = members(1, 4);
    let mut h = elected(&committee);
    let vote = success_vote(1, &committee, "vault-1");
    h.submit(committee[0], Command::VoteKeygen(vote.clone())).unwrap();
    let err = h
        .submit(committee[0], Command::VoteKeygen(vote))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Proposal(ProposalError::AlreadyVoted { .. })
    ));
    assert_eq!(h.core.slash_points(&committee[0]), 1);
}

#[test]
fn epoch_cannot_be_keyed_twice() {
    let committee = members(1, 4);
    let mut h = Harness::new();
    h.keygen(1, &committee, "vault-1");
    let err = h.orchestrate(Command::Elect { epoch: 1 }).unwrap_err();
    assert_eq!(err, EngineError::Vault(VaultError::EpochAlreadyKeyed(1)));
}
