use std::collections::BTreeMap;

use dagbft_consensus_core::block::{BlockHash, PbftBlock};
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::stake::Weight;
use dagbft_consensus_core::vote::{SignedVote, VoteHash, VoteType};
use snafu::{Snafu, ensure};

#[derive(Debug, Snafu)]
pub enum RewardVotesError {
    #[snafu(display("First period block must not carry reward votes"))]
    UnexpectedRewardVotes,
    #[snafu(display("Reward votes are for period {expected}, block is of period {period}"))]
    RewardPeriodMismatch { period: Period, expected: Period },
    #[snafu(display("Missing {missing} out of {total} reward votes"))]
    MissingRewardVotes { missing: usize, total: usize },
    #[snafu(display("Duplicate reward vote {vote_hash}"))]
    DuplicateRewardVote { vote_hash: VoteHash },
    #[snafu(display("Reward votes weight {weight} below {threshold}"))]
    InsufficientRewardWeight { weight: Weight, threshold: Weight },
}

pub type RewardVotesResult<T> = Result<T, RewardVotesError>;

/// The slot whose cert votes certified the last block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RewardSlot {
    pub period: Period,
    pub round: Round,
    pub step: Step,
    pub block_hash: BlockHash,
}

#[derive(Debug, Default)]
pub(super) struct RewardVotes {
    pub slot: Option<RewardSlot>,
    pub votes: BTreeMap<VoteHash, SignedVote>,
}

impl RewardVotes {
    pub fn matches(&self, vote: &SignedVote) -> bool {
        self.slot.is_some_and(|slot| {
            vote.vote_type == VoteType::Cert
                && slot.period == vote.period
                && slot.round == vote.round
                && slot.step == vote.step
                && slot.block_hash == vote.block_hash
        })
    }

    pub fn reset(&mut self, slot: RewardSlot, votes: impl IntoIterator<Item = SignedVote>) {
        self.slot = Some(slot);
        self.votes.clear();
        for vote in votes {
            if self.matches(&vote) {
                self.votes.insert(vote.vote_hash(), vote);
            }
        }
    }

    pub fn check(&self, block: &PbftBlock, threshold: Weight) -> RewardVotesResult<Vec<SignedVote>> {
        let Some(expected) = block.period.prev().filter(|p| Period::ZERO < *p) else {
            ensure!(block.reward_votes.is_empty(), UnexpectedRewardVotesSnafu);
            return Ok(vec![]);
        };

        if let Some(slot) = self.slot {
            ensure!(
                slot.period == expected,
                RewardPeriodMismatchSnafu {
                    period: block.period,
                    expected: slot.period,
                }
            );
        }

        let mut found = BTreeMap::new();
        let mut missing: usize = 0;
        for vote_hash in &block.reward_votes {
            match self.votes.get(vote_hash) {
                Some(vote) => {
                    if found.insert(*vote_hash, *vote).is_some() {
                        return DuplicateRewardVoteSnafu {
                            vote_hash: *vote_hash,
                        }
                        .fail();
                    }
                }
                None => missing += 1,
            }
        }
        ensure!(
            missing == 0,
            MissingRewardVotesSnafu {
                missing,
                total: block.reward_votes.len(),
            }
        );

        let weight: Weight = found.values().map(|v| v.weight).sum();
        ensure!(
            threshold <= weight,
            InsufficientRewardWeightSnafu { weight, threshold }
        );

        Ok(found.into_values().collect())
    }
}
