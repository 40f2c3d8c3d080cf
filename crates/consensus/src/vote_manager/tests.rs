use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use assert_matches::assert_matches;
use dagbft_consensus_core::Signature;
use dagbft_consensus_core::block::{BlockHash, PbftBlock, StateRoot};
use dagbft_consensus_core::block::{DagBlockHash, OrderHash};
use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::signed::Signed;
use dagbft_consensus_core::stake::Weight;
use dagbft_consensus_core::vote::{SignedVote, Vote, VoteType};
use proptest::prelude::*;

use super::{RewardVotesError, VoteError, VoteManager, VoteOutcome, VoteWindow, VotedKind};
use crate::test_utils::{CollectingSlashing, StaticDpos, arc_pair, block_hash};

const P1: Period = Period::FIRST;
const R1: Round = Round::FIRST;

fn setup(stakes: &[u64]) -> (Arc<StaticDpos>, Arc<CollectingSlashing>, VoteManager) {
    let (dpos, slashing) = arc_pair(StaticDpos::new(stakes));
    let vm = VoteManager::new(dpos.clone(), dpos.params, slashing.clone());
    (dpos, slashing, vm)
}

fn add_all(vm: &VoteManager, votes: impl IntoIterator<Item = SignedVote>) {
    for vote in votes {
        vm.validate_vote(&vote).expect("valid vote");
        assert_eq!(vm.add_verified_vote(vote), VoteOutcome::Accepted);
    }
}

#[test]
fn thresholds_follow_total_stake() {
    let (_, _, vm) = setup(&[1, 1, 1, 1]);
    let t = vm.thresholds(P1).expect("stake known");
    assert_eq!(t.two_t_plus_one, Weight::new(3));
    assert_eq!(t.t_plus_one, Weight::new(2));
}

#[test]
fn honest_votes_validate_with_their_weight() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);

    for step in [Step::PROPOSE, Step::FILTER, Step::CERTIFY, Step::new(4), Step::new(5)] {
        let vote = dpos.vote(0, block_hash(1), P1, R1, step);
        assert_eq!(vm.validate_vote(&vote).expect("valid"), Weight::new(1));
    }

    let null_next = dpos.vote(1, BlockHash::NULL, P1, R1, Step::new(4));
    assert_eq!(vm.validate_vote(&null_next).expect("valid"), Weight::new(1));
}

#[test]
fn malformed_votes_are_rejected() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);
    let keys = &dpos.keys[0];

    let null_proposal = dpos.vote(0, BlockHash::NULL, P1, R1, Step::PROPOSE);
    assert_matches!(vm.validate_vote(&null_proposal), Err(VoteError::NullProposal));

    let mut bad_sig = dpos.vote(0, block_hash(1), P1, R1, Step::CERTIFY);
    bad_sig.sig = Signature::ZERO;
    assert_matches!(vm.validate_vote(&bad_sig), Err(VoteError::InvalidSignature));

    let good = dpos.vote(0, block_hash(1), P1, R1, Step::CERTIFY);
    let wrong_type = Signed::new_sign(
        Vote {
            vote_type: VoteType::Soft,
            ..good.inner
        },
        keys.seckey,
    );
    assert_matches!(
        vm.validate_vote(&wrong_type),
        Err(VoteError::StepTypeMismatch { .. })
    );

    let step_zero_cred = keys.credential(P1, R1, Step::ZERO).expect("valid key");
    let step_zero = keys.sign_vote_with_credential(block_hash(1), step_zero_cred, Weight::new(1));
    assert_matches!(
        vm.validate_vote(&step_zero),
        Err(VoteError::StepTypeMismatch { .. })
    );

    let moved_slot = Signed::new_sign(
        Vote {
            round: Round::new(2),
            ..good.inner
        },
        keys.seckey,
    );
    assert_matches!(vm.validate_vote(&moved_slot), Err(VoteError::InvalidSortition));

    // Credential of someone else
    let other_cred = keys.credential(P1, R1, Step::CERTIFY).expect("valid key");
    let stolen = dpos.keys[1].sign_vote_with_credential(block_hash(1), other_cred, Weight::new(1));
    assert_matches!(vm.validate_vote(&stolen), Err(VoteError::InvalidSortition));

    let inflated = keys.sign_vote_with_credential(block_hash(1), good.credential, Weight::new(2));
    assert_matches!(
        vm.validate_vote(&inflated),
        Err(VoteError::WeightMismatch { claimed, computed })
            if claimed == Weight::new(2) && computed == Weight::new(1)
    );

    let stranger = ValidatorKeys::generate();
    let unknown = stranger
        .sign_vote(block_hash(1), P1, R1, Step::CERTIFY, Weight::new(1))
        .expect("valid key");
    assert_matches!(vm.validate_vote(&unknown), Err(VoteError::UnknownVoter { .. }));
}

#[test]
fn votes_outside_period_window_are_rejected() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);
    vm.set_current_period(Period::new(5));

    let at = |p| dpos.vote(0, block_hash(1), Period::new(p), R1, Step::CERTIFY);

    assert_matches!(vm.validate_vote(&at(3)), Err(VoteError::StaleVote { .. }));
    assert_matches!(vm.validate_vote(&at(7)), Err(VoteError::FutureVote { .. }));
    for p in [4, 5, 6] {
        vm.validate_vote(&at(p)).expect("within window");
    }
}

#[test]
fn votes_outside_round_window_are_rejected() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);
    let vm = vm.with_window(VoteWindow { rounds: 3, steps: 5 });
    vm.set_current_round_step(Round::new(4), Step::new(6));

    let at = |round, step| dpos.vote(0, block_hash(1), P1, Round::new(round), Step::new(step));

    assert_matches!(
        vm.validate_vote(&at(2, 3)),
        Err(VoteError::StaleRound { round, .. }) if round == Round::new(2)
    );
    assert_matches!(vm.validate_vote(&at(2, 4)), Err(VoteError::StaleRound { .. }));
    // Only next votes of the previous round still count
    assert_matches!(vm.validate_vote(&at(3, 3)), Err(VoteError::StaleRound { .. }));
    vm.validate_vote(&at(3, 4)).expect("previous round next vote");

    vm.validate_vote(&at(4, 3)).expect("current round");
    vm.validate_vote(&at(6, 3)).expect("within window");
    assert_matches!(
        vm.validate_vote(&at(7, 3)),
        Err(VoteError::FutureRound { round, current })
            if round == Round::new(7) && current == Round::new(4)
    );

    // Steps are bounded from ours in our round, from the first one elsewhere
    vm.validate_vote(&at(4, 10)).expect("within window");
    assert_matches!(
        vm.validate_vote(&at(4, 11)),
        Err(VoteError::FutureStep { step, current })
            if step == Step::new(11) && current == Step::new(6)
    );
    vm.validate_vote(&at(5, 5)).expect("within window");
    assert_matches!(vm.validate_vote(&at(5, 6)), Err(VoteError::FutureStep { .. }));

    // Certificates and bundles may carry votes of any round
    vm.validate_vote_any_round(&at(2, 3)).expect("any round");
    vm.validate_vote_any_round(&at(9, 40)).expect("any round");
}

#[test]
fn round_window_of_next_period_starts_from_first_round() {
    let (dpos, slashing, unbounded) = setup(&[1, 1, 1, 1]);
    let vm = VoteManager::new(dpos.clone(), dpos.params, slashing)
        .with_window(VoteWindow { rounds: 3, steps: 0 });
    vm.set_current_round_step(Round::new(8), Step::new(4));

    let p2 = Period::new(2);
    let at = |round| dpos.vote(0, block_hash(1), p2, Round::new(round), Step::new(30));

    vm.validate_vote(&at(1)).expect("first round");
    vm.validate_vote(&at(3)).expect("within window");
    assert_matches!(vm.validate_vote(&at(4)), Err(VoteError::FutureRound { .. }));

    // Without a bound only stale rounds are refused
    unbounded.set_current_round_step(Round::new(8), Step::new(4));
    unbounded.validate_vote(&at(40)).expect("no round bound");
    let far_step = dpos.vote(0, BlockHash::NULL, P1, Round::new(8), Step::new(900));
    unbounded.validate_vote(&far_step).expect("no step bound");
    let stale = dpos.vote(0, BlockHash::NULL, P1, Round::new(6), Step::new(4));
    assert_matches!(unbounded.validate_vote(&stale), Err(VoteError::StaleRound { .. }));
}

#[test]
fn missing_stake_snapshot_makes_vote_stale() {
    let mut dpos = StaticDpos::new(&[1, 1, 1, 1]);
    dpos.available_from = Period::new(3);
    let (dpos, slashing) = arc_pair(dpos);
    let vm = VoteManager::new(dpos.clone(), dpos.params, slashing);
    vm.set_current_period(Period::new(3));

    let vote = dpos.vote(0, block_hash(1), Period::new(2), R1, Step::CERTIFY);
    assert_matches!(vm.validate_vote(&vote), Err(VoteError::StaleVote { .. }));
}

#[test]
fn cert_quorum_needs_two_t_plus_one_weight() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);
    let hash = block_hash(7);

    add_all(
        &vm,
        (0..2).map(|i| dpos.vote(i, hash, P1, R1, Step::CERTIFY)),
    );
    assert_eq!(vm.quorum_block(P1, R1, Step::CERTIFY, VoteType::Cert), None);
    assert_eq!(vm.voted_block(P1, R1, VotedKind::CertVoted), None);

    add_all(&vm, [dpos.vote(2, hash, P1, R1, Step::CERTIFY)]);
    assert_eq!(
        vm.quorum_block(P1, R1, Step::CERTIFY, VoteType::Cert),
        Some(hash)
    );
    assert_eq!(
        vm.voted_block(P1, R1, VotedKind::CertVoted),
        Some((hash, Step::CERTIFY))
    );
    // Asking with a type that does not belong to the step
    assert_eq!(vm.quorum_block(P1, R1, Step::CERTIFY, VoteType::Soft), None);
    assert_eq!(vm.votes_for(P1, R1, Step::CERTIFY, hash).len(), 3);
}

#[test]
fn repeated_vote_is_known_and_conflicting_one_reported() {
    let (dpos, slashing, vm) = setup(&[1, 1, 1, 1]);

    let first = dpos.vote(0, block_hash(1), P1, R1, Step::FILTER);
    let second = dpos.vote(0, block_hash(2), P1, R1, Step::FILTER);

    assert_eq!(vm.add_verified_vote(first), VoteOutcome::Accepted);
    assert_eq!(vm.add_verified_vote(first), VoteOutcome::AlreadyKnown);
    assert_eq!(vm.add_verified_vote(second), VoteOutcome::DuplicateVoter);

    let evidence = slashing.evidence.lock().expect("Locking failed");
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].first, first);
    assert_eq!(evidence[0].second, second);
    assert_eq!(evidence[0].voter(), dpos.keys[0].pubkey());

    assert!(vm.votes_for(P1, R1, Step::FILTER, block_hash(2)).is_empty());
}

#[test]
fn next_votes_allow_one_value_and_one_null() {
    let (dpos, slashing, vm) = setup(&[1, 1, 1, 1]);
    let step = Step::new(5);

    let value = dpos.vote(0, block_hash(1), P1, R1, step);
    let null = dpos.vote(0, BlockHash::NULL, P1, R1, step);
    let other_value = dpos.vote(0, block_hash(2), P1, R1, step);

    assert_eq!(vm.add_verified_vote(value), VoteOutcome::Accepted);
    assert_eq!(vm.add_verified_vote(null), VoteOutcome::Accepted);
    assert_eq!(vm.add_verified_vote(other_value), VoteOutcome::DuplicateVoter);
    assert_eq!(slashing.evidence.lock().expect("Locking failed").len(), 1);

    let voter = dpos.keys[0].pubkey();
    assert_eq!(vm.voter_vote(P1, R1, step, voter, false), Some(value));
    assert_eq!(vm.voter_vote(P1, R1, step, voter, true), Some(null));
    assert_eq!(vm.voter_vote(P1, R1, Step::new(7), voter, true), None);
}

#[test]
fn next_vote_quorums_and_new_round() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);

    assert_eq!(vm.determine_new_round(P1, R1), None);

    add_all(
        &vm,
        (0..3).map(|i| dpos.vote(i, BlockHash::NULL, P1, R1, Step::new(4))),
    );
    assert_eq!(
        vm.voted_block(P1, R1, VotedKind::NextVotedNull),
        Some((BlockHash::NULL, Step::new(4)))
    );
    assert_eq!(vm.voted_block(P1, R1, VotedKind::NextVoted), None);
    assert_eq!(
        vm.quorum_block(P1, R1, Step::new(4), VoteType::Next),
        Some(BlockHash::NULL)
    );
    assert_eq!(vm.determine_new_round(P1, R1), Some(Round::new(2)));

    // A later round reaching a value quorum wins
    let r3 = Round::new(3);
    add_all(
        &vm,
        (1..4).map(|i| dpos.vote(i, block_hash(9), P1, r3, Step::new(6))),
    );
    assert_eq!(
        vm.voted_block(P1, r3, VotedKind::NextVoted),
        Some((block_hash(9), Step::new(6)))
    );
    assert_eq!(vm.determine_new_round(P1, R1), Some(Round::new(4)));
    assert_eq!(vm.determine_new_round(P1, Round::new(4)), None);
}

#[test]
fn network_next_voting_step_needs_t_plus_one() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);

    add_all(
        &vm,
        [
            dpos.vote(0, BlockHash::NULL, P1, R1, Step::new(4)),
            dpos.vote(1, BlockHash::NULL, P1, R1, Step::new(4)),
            dpos.vote(0, BlockHash::NULL, P1, R1, Step::new(9)),
            // Value and null from the same voter count once
            dpos.vote(2, block_hash(1), P1, R1, Step::new(11)),
            dpos.vote(2, BlockHash::NULL, P1, R1, Step::new(11)),
        ],
    );

    assert_eq!(
        vm.network_t_plus_one_next_voting_step(P1, R1),
        Some(Step::new(4))
    );

    add_all(&vm, [dpos.vote(3, block_hash(1), P1, R1, Step::new(11))]);
    assert_eq!(
        vm.network_t_plus_one_next_voting_step(P1, R1),
        Some(Step::new(11))
    );
}

#[test]
fn cleanup_drops_older_periods() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);

    for p in 1..=3 {
        vm.set_current_period(Period::new(p));
        add_all(
            &vm,
            (0..3).map(|i| dpos.vote(i, block_hash(1), Period::new(p), R1, Step::CERTIFY)),
        );
    }

    vm.cleanup_votes_by_period(Period::new(2));

    assert!(vm.votes_for(Period::new(1), R1, Step::CERTIFY, block_hash(1)).is_empty());
    assert_eq!(vm.votes_for(Period::new(2), R1, Step::CERTIFY, block_hash(1)).len(), 3);
    assert_eq!(
        vm.quorum_block(Period::new(3), R1, Step::CERTIFY, VoteType::Cert),
        Some(block_hash(1))
    );
}

fn block_with_rewards(period: Period, reward_votes: &[SignedVote]) -> PbftBlock {
    PbftBlock::builder()
        .period(period)
        .prev_block_hash(block_hash(1))
        .anchor_hash(DagBlockHash::NULL)
        .order_hash(OrderHash::NULL)
        .prev_state_root(StateRoot::NULL)
        .beneficiary(Default::default())
        .reward_votes(reward_votes.iter().map(|v| v.vote_hash()).collect())
        .build()
}

#[test]
fn reward_votes_collected_and_checked() {
    let (dpos, _, vm) = setup(&[1, 1, 1, 1]);
    let certified = block_hash(1);

    let cert_votes: Vec<_> = (0..4)
        .map(|i| dpos.vote(i, certified, P1, R1, Step::CERTIFY))
        .collect();
    add_all(&vm, cert_votes[..3].iter().copied());

    vm.reset_reward_votes(P1, R1, Step::CERTIFY, certified);
    assert_eq!(vm.reward_votes().len(), 3);

    // Late cert vote for the same block joins
    add_all(&vm, [cert_votes[3]]);
    assert_eq!(vm.reward_votes().len(), 4);

    let p2 = Period::new(2);
    let ok = vm
        .check_reward_votes(&block_with_rewards(p2, &cert_votes[..3]))
        .expect("known votes");
    assert_eq!(ok.len(), 3);

    assert_matches!(
        vm.check_reward_votes(&block_with_rewards(p2, &cert_votes[..2])),
        Err(RewardVotesError::InsufficientRewardWeight { .. })
    );

    let unrelated = dpos.vote(0, block_hash(2), P1, R1, Step::CERTIFY);
    let mut with_unknown = cert_votes[..3].to_vec();
    with_unknown.push(unrelated);
    assert_matches!(
        vm.check_reward_votes(&block_with_rewards(p2, &with_unknown)),
        Err(RewardVotesError::MissingRewardVotes {
            missing: 1,
            total: 4
        })
    );

    assert_matches!(
        vm.check_reward_votes(&block_with_rewards(P1, &cert_votes[..1])),
        Err(RewardVotesError::UnexpectedRewardVotes)
    );
    vm.check_reward_votes(&block_with_rewards(P1, &[]))
        .expect("first period has none");

    assert_matches!(
        vm.check_reward_votes(&block_with_rewards(Period::new(3), &cert_votes[..3])),
        Err(RewardVotesError::RewardPeriodMismatch { .. })
    );
}

const NUM_VOTERS: usize = 7;
const NUM_BLOCKS: usize = 3;

/// Pre-signed votes, `[voter][block]`, for the cert step and for a next step
///
/// Block `0` is null, which only next votes can be for.
struct Fixture {
    dpos: Arc<StaticDpos>,
    cert: Vec<Vec<SignedVote>>,
    next: Vec<Vec<SignedVote>>,
}

static FIXTURE: LazyLock<Fixture> = LazyLock::new(|| {
    let dpos = StaticDpos::new(&[1; NUM_VOTERS]);
    let hash = |b: usize| {
        if b == 0 {
            BlockHash::NULL
        } else {
            block_hash(b as u8)
        }
    };
    let cert = (0..NUM_VOTERS)
        .map(|v| {
            (0..NUM_BLOCKS)
                .map(|b| dpos.vote(v, block_hash(b as u8 + 1), P1, R1, Step::CERTIFY))
                .collect()
        })
        .collect();
    let next = (0..NUM_VOTERS)
        .map(|v| {
            (0..NUM_BLOCKS)
                .map(|b| dpos.vote(v, hash(b), P1, R1, Step::new(4)))
                .collect()
        })
        .collect();
    Fixture {
        dpos: Arc::new(dpos),
        cert,
        next,
    }
});

fn fixture_manager() -> VoteManager {
    let dpos = FIXTURE.dpos.clone();
    VoteManager::new(
        dpos.clone(),
        dpos.params,
        Arc::new(CollectingSlashing::default()),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn at_most_one_cert_quorum(picks in prop::collection::vec((0..NUM_VOTERS, 0..NUM_BLOCKS), 0..30)) {
        let vm = fixture_manager();
        let threshold = vm.two_t_plus_one(P1).expect("stake known");
        let mut seen_quorum = None;

        for (voter, block) in picks {
            vm.add_verified_vote(FIXTURE.cert[voter][block]);

            let quorum = vm.quorum_block(P1, R1, Step::CERTIFY, VoteType::Cert);
            if let Some(prev) = seen_quorum {
                // Never changes once reported
                prop_assert_eq!(quorum, Some(prev));
            }
            seen_quorum = quorum;
        }

        let over_threshold: BTreeSet<_> = (0..NUM_BLOCKS)
            .map(|b| block_hash(b as u8 + 1))
            .filter(|h| {
                let w: Weight = vm
                    .votes_for(P1, R1, Step::CERTIFY, *h)
                    .iter()
                    .map(|v| v.weight)
                    .sum();
                threshold <= w
            })
            .collect();
        prop_assert!(over_threshold.len() <= 1);
        prop_assert_eq!(seen_quorum, over_threshold.first().copied());
    }

    #[test]
    fn ingestion_is_idempotent_and_conserves_weight(
        picks in prop::collection::vec((0..NUM_VOTERS, 0..NUM_BLOCKS), 0..30)
    ) {
        let vm = fixture_manager();
        let step = Step::new(4);

        let mut accepted = vec![];
        for (voter, block) in &picks {
            let vote = FIXTURE.next[*voter][*block];
            if vm.add_verified_vote(vote) == VoteOutcome::Accepted {
                accepted.push(vote);
            }
        }
        for (voter, block) in &picks {
            prop_assert_ne!(
                vm.add_verified_vote(FIXTURE.next[*voter][*block]),
                VoteOutcome::Accepted
            );
        }

        let mut total = Weight::ZERO;
        let mut count = 0;
        for b in 0..NUM_BLOCKS {
            let hash = FIXTURE.next[0][b].block_hash;
            let votes = vm.votes_for(P1, R1, step, hash);
            let voters: BTreeSet<_> = votes.iter().map(|v| v.voter).collect();
            prop_assert_eq!(voters.len(), votes.len());
            total = total.saturating_add(votes.iter().map(|v| v.weight).sum());
            count += votes.len();
        }
        let expected: Weight = accepted.iter().map(|v| v.weight).sum();
        prop_assert_eq!(total, expected);
        prop_assert_eq!(count, accepted.len());
    }
}
