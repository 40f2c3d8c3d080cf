use std::collections::BTreeMap;

use dagbft_consensus_core::block::BlockHash;
use dagbft_consensus_core::period::Step;
use dagbft_consensus_core::stake::Weight;
use dagbft_consensus_core::validator::ValidatorPubkey;
use dagbft_consensus_core::vote::{SignedVote, VoteType};

use super::VotedKind;

/// Which "vote" of a voter in a step a vote is
///
/// In next steps a voter can vote both for a value and for null, so these
/// are tracked separately. Everywhere else a voter gets exactly one.
pub(super) type VoterSlot = (ValidatorPubkey, bool);

pub(super) fn voter_slot(vote: &SignedVote) -> VoterSlot {
    (
        vote.voter,
        vote.vote_type == VoteType::Next && vote.block_hash.is_null(),
    )
}

#[derive(Debug, Default, Clone)]
pub(super) struct BlockVotes {
    pub weight: Weight,
    pub votes: Vec<SignedVote>,
}

#[derive(Debug, Default)]
pub(super) struct StepVotes {
    pub by_voter: BTreeMap<VoterSlot, SignedVote>,
    pub by_block: BTreeMap<BlockHash, BlockVotes>,
    /// Cached quorum on a (non-null) value
    quorum_value: Option<BlockHash>,
    /// Cached quorum on null
    quorum_null: bool,
}

pub(super) enum StepInsert {
    Inserted,
    Known,
    Conflict(SignedVote),
}

impl StepVotes {
    pub fn insert(&mut self, vote: SignedVote) -> StepInsert {
        let slot = voter_slot(&vote);
        if let Some(existing) = self.by_voter.get(&slot) {
            return if *existing == vote {
                StepInsert::Known
            } else {
                StepInsert::Conflict(*existing)
            };
        }
        self.by_voter.insert(slot, vote);

        let bucket = self.by_block.entry(vote.block_hash).or_default();
        bucket.weight = bucket.weight.saturating_add(vote.weight);
        bucket.votes.push(vote);
        StepInsert::Inserted
    }

    /// Block with at least `threshold` weight, if any
    ///
    /// If several qualify (only possible with enough equivocating weight),
    /// the heaviest wins, ties broken by the lowest hash. Once reported, a
    /// quorum sticks.
    pub fn quorum_value(&mut self, threshold: Weight) -> Option<BlockHash> {
        if self.quorum_value.is_some() {
            return self.quorum_value;
        }

        self.quorum_value = self
            .by_block
            .iter()
            .filter(|(hash, bucket)| !hash.is_null() && threshold <= bucket.weight)
            .max_by(|(a_hash, a), (b_hash, b)| {
                a.weight.cmp(&b.weight).then_with(|| b_hash.cmp(a_hash))
            })
            .map(|(hash, _)| *hash);
        self.quorum_value
    }

    pub fn quorum_null(&mut self, threshold: Weight) -> bool {
        if !self.quorum_null {
            self.quorum_null = self
                .by_block
                .get(&BlockHash::NULL)
                .is_some_and(|bucket| threshold <= bucket.weight);
        }
        self.quorum_null
    }

    /// Weight of distinct voters, no matter what they voted for
    pub fn unique_voters_weight(&self) -> Weight {
        let mut seen = BTreeMap::new();
        for ((voter, _), vote) in &self.by_voter {
            seen.entry(*voter).or_insert(vote.weight);
        }
        seen.into_values().sum()
    }
}

#[derive(Debug, Default)]
pub(super) struct RoundVotes {
    pub steps: BTreeMap<Step, StepVotes>,
    voted: BTreeMap<VotedKind, (BlockHash, Step)>,
}

impl RoundVotes {
    pub fn step_mut(&mut self, step: Step) -> &mut StepVotes {
        self.steps.entry(step).or_default()
    }

    pub fn voted_block(&mut self, kind: VotedKind, threshold: Weight) -> Option<(BlockHash, Step)> {
        if let Some(voted) = self.voted.get(&kind) {
            return Some(*voted);
        }

        let found = match kind {
            VotedKind::SoftVoted => self
                .steps
                .get_mut(&Step::FILTER)
                .and_then(|s| s.quorum_value(threshold))
                .map(|hash| (hash, Step::FILTER)),
            VotedKind::CertVoted => self
                .steps
                .get_mut(&Step::CERTIFY)
                .and_then(|s| s.quorum_value(threshold))
                .map(|hash| (hash, Step::CERTIFY)),
            VotedKind::NextVoted => self
                .steps
                .range_mut(Step::FIRST_FINISH..)
                .find_map(|(step, s)| s.quorum_value(threshold).map(|hash| (hash, *step))),
            VotedKind::NextVotedNull => self
                .steps
                .range_mut(Step::FIRST_FINISH..)
                .find_map(|(step, s)| s.quorum_null(threshold).then_some((BlockHash::NULL, *step))),
        };

        if let Some(found) = found {
            self.voted.insert(kind, found);
        }
        found
    }

    pub fn has_next_vote_quorum(&mut self, threshold: Weight) -> bool {
        self.voted_block(VotedKind::NextVoted, threshold).is_some()
            || self
                .voted_block(VotedKind::NextVotedNull, threshold)
                .is_some()
    }
}
