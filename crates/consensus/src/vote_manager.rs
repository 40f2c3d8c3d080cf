//! Vote validation and quorum accounting
//!
//! The ledger is split per `(period, round)`: a map behind a `RwLock` hands
//! out buckets that each have their own mutex, so ingesting votes of one
//! round does not block queries about another.
//!
//! Quorums are weighted: what counts is the sum of sortition weights, never
//! the number of voters. They are evaluated lazily, when asked for, and
//! never go away once reported.
mod reward_votes;
mod round_votes;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dagbft_consensus_core::block::{BlockHash, PbftBlock};
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::sortition::{SortitionParams, compute_weight};
use dagbft_consensus_core::stake::Weight;
use dagbft_consensus_core::validator::ValidatorPubkey;
use dagbft_consensus_core::vote::{SignedVote, VoteType};
use dagbft_consensus_core::vrf::verify_credential;
pub use reward_votes::{RewardVotesError, RewardVotesResult};
use reward_votes::{RewardSlot, RewardVotes};
use round_votes::{RoundVotes, StepInsert};
use snafu::{OptionExt as _, Snafu, ensure};
use tracing::{debug, trace};

use crate::LOG_TARGET;
use crate::interfaces::{DposError, DposViewArc, EquivocationEvidence, SlashingReporterArc};

#[derive(Debug, Snafu)]
pub enum VoteError {
    #[snafu(display("Vote of period {period} is stale (current: {current})"))]
    StaleVote { period: Period, current: Period },
    #[snafu(display("Vote of period {period} is too far ahead (current: {current})"))]
    FutureVote { period: Period, current: Period },
    #[snafu(display("Vote of round {round} is stale (current: {current})"))]
    StaleRound { round: Round, current: Round },
    #[snafu(display("Vote of round {round} is too far ahead (current: {current})"))]
    FutureRound { round: Round, current: Round },
    #[snafu(display("Vote of step {step} is too far ahead (current: {current})"))]
    FutureStep { step: Step, current: Step },
    #[snafu(display("Vote type {vote_type} not valid in step {step}"))]
    StepTypeMismatch { step: Step, vote_type: VoteType },
    #[snafu(display("Propose vote for a null block"))]
    NullProposal,
    InvalidSignature,
    InvalidSortition,
    #[snafu(display("Voter {voter} unknown in period {period}"))]
    UnknownVoter {
        voter: ValidatorPubkey,
        period: Period,
    },
    #[snafu(display("Voter not eligible in this slot"))]
    NotEligible,
    #[snafu(display("Claimed weight {claimed} but sortition gives {computed}"))]
    WeightMismatch { claimed: Weight, computed: Weight },
}

pub type VoteResult<T> = Result<T, VoteError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted,
    /// Voter already voted differently in this slot
    DuplicateVoter,
    /// The exact same vote is already there
    AlreadyKnown,
}

/// A block that reached 2t+1 in a round, by which kind of votes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VotedKind {
    SoftVoted,
    CertVoted,
    NextVoted,
    NextVotedNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub two_t_plus_one: Weight,
    pub t_plus_one: Weight,
}

/// How far ahead of the local round and step live votes may be
///
/// Zero disables the corresponding bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteWindow {
    pub rounds: u64,
    pub steps: u64,
}

pub struct VoteManager {
    dpos: DposViewArc,
    params: SortitionParams,
    slashing: SlashingReporterArc,
    window: VoteWindow,
    current_period: AtomicU64,
    current_round: AtomicU64,
    current_step: AtomicU64,
    thresholds: Mutex<BTreeMap<Period, Thresholds>>,
    rounds: RwLock<BTreeMap<(Period, Round), Arc<Mutex<RoundVotes>>>>,
    reward: Mutex<RewardVotes>,
}

impl VoteManager {
    pub fn new(
        dpos: DposViewArc,
        params: SortitionParams,
        slashing: SlashingReporterArc,
    ) -> Self {
        Self {
            dpos,
            params,
            slashing,
            window: VoteWindow::default(),
            current_period: AtomicU64::new(Period::FIRST.to_number()),
            current_round: AtomicU64::new(Round::FIRST.to_number()),
            current_step: AtomicU64::new(Step::PROPOSE.to_number()),
            thresholds: Mutex::new(BTreeMap::new()),
            rounds: RwLock::new(BTreeMap::new()),
            reward: Mutex::new(RewardVotes::default()),
        }
    }

    pub fn current_period(&self) -> Period {
        Period::new(self.current_period.load(Ordering::SeqCst))
    }

    pub fn set_current_period(&self, period: Period) {
        self.current_period
            .store(period.to_number(), Ordering::SeqCst);
    }

    pub fn with_window(self, window: VoteWindow) -> Self {
        Self { window, ..self }
    }

    pub fn current_round_step(&self) -> (Round, Step) {
        (
            Round::new(self.current_round.load(Ordering::SeqCst)),
            Step::new(self.current_step.load(Ordering::SeqCst)),
        )
    }

    pub fn set_current_round_step(&self, round: Round, step: Step) {
        self.current_round.store(round.to_number(), Ordering::SeqCst);
        self.current_step.store(step.to_number(), Ordering::SeqCst);
    }

    /// Quorum thresholds of `period`, `None` if its stake is unknown
    pub fn thresholds(&self, period: Period) -> Option<Thresholds> {
        let mut cache = self.thresholds.lock().expect("Locking failed");
        if let Some(t) = cache.get(&period) {
            return Some(*t);
        }
        let total = self.dpos.total_eligible_stake(period).ok()?;
        let t = Thresholds {
            two_t_plus_one: self.params.two_t_plus_one(total),
            t_plus_one: self.params.t_plus_one(total),
        };
        cache.insert(period, t);
        Some(t)
    }

    pub fn two_t_plus_one(&self, period: Period) -> Option<Weight> {
        self.thresholds(period).map(|t| t.two_t_plus_one)
    }

    /// Check everything about `vote` that can be checked without the ledger
    ///
    /// Returns the voter's weight.
    pub fn validate_vote(&self, vote: &SignedVote) -> VoteResult<Weight> {
        self.check_period_window(vote)?;
        self.check_round_window(vote)?;
        self.verify_vote(vote)
    }

    /// Like [`Self::validate_vote`], but accepting any round and step
    ///
    /// For cert votes of certificates and for bundles of next votes, which
    /// is how a node stuck in an old round catches up.
    pub fn validate_vote_any_round(&self, vote: &SignedVote) -> VoteResult<Weight> {
        self.check_period_window(vote)?;
        self.verify_vote(vote)
    }

    fn check_period_window(&self, vote: &SignedVote) -> VoteResult<()> {
        let current = self.current_period();
        let period = vote.period;

        ensure!(
            current.saturating_sub(1) <= period,
            StaleVoteSnafu { period, current }
        );
        ensure!(
            period <= current.saturating_add(1),
            FutureVoteSnafu { period, current }
        );
        Ok(())
    }

    fn verify_vote(&self, vote: &SignedVote) -> VoteResult<Weight> {
        let current = self.current_period();
        let period = vote.period;

        ensure!(
            Step::ZERO < vote.step && VoteType::from_step(vote.step) == vote.vote_type,
            StepTypeMismatchSnafu {
                step: vote.step,
                vote_type: vote.vote_type,
            }
        );
        ensure!(
            !(vote.vote_type == VoteType::Propose && vote.block_hash.is_null()),
            NullProposalSnafu
        );
        vote.verify_sig_validator(vote.voter)
            .ok()
            .context(InvalidSignatureSnafu)?;
        ensure!(vote.credential_matches_slot(), InvalidSortitionSnafu);

        let vrf_pubkey = self
            .dpos
            .vrf_pubkey_of(vote.voter, period)
            .map_err(|_| VoteError::StaleVote { period, current })?
            .context(UnknownVoterSnafu {
                voter: vote.voter,
                period,
            })?;
        ensure!(
            verify_credential(vrf_pubkey, &vote.credential),
            InvalidSortitionSnafu
        );

        let stake_err = |_: DposError| VoteError::StaleVote { period, current };
        let own = self.dpos.stake_of(vote.voter, period).map_err(stake_err)?;
        let total = self
            .dpos
            .total_eligible_stake(period)
            .map_err(stake_err)?;
        let computed = compute_weight(&vote.credential, own, total, &self.params);

        ensure!(!computed.is_zero(), NotEligibleSnafu);
        ensure!(
            computed == vote.weight,
            WeightMismatchSnafu {
                claimed: vote.weight,
                computed,
            }
        );

        Ok(computed)
    }

    fn check_round_window(&self, vote: &SignedVote) -> VoteResult<()> {
        let (current_round, current_step) = self.current_round_step();
        let same_period = vote.period == self.current_period();

        let checking_round = if same_period {
            current_round
        } else {
            Round::FIRST
        };
        // Next votes of the previous round are how peers still in it catch up
        let previous_next = vote.vote_type == VoteType::Next
            && vote.round.next() == Some(checking_round);
        ensure!(
            checking_round <= vote.round || previous_next,
            StaleRoundSnafu {
                round: vote.round,
                current: checking_round,
            }
        );
        ensure!(
            self.window.rounds == 0
                || vote.round.to_number()
                    < checking_round.to_number().saturating_add(self.window.rounds),
            FutureRoundSnafu {
                round: vote.round,
                current: checking_round,
            }
        );

        let checking_step = if same_period && vote.round == current_round {
            current_step
        } else {
            Step::PROPOSE
        };
        ensure!(
            self.window.steps == 0
                || vote.step.to_number()
                    < checking_step.to_number().saturating_add(self.window.steps),
            FutureStepSnafu {
                step: vote.step,
                current: checking_step,
            }
        );
        Ok(())
    }

    fn round_votes(&self, period: Period, round: Round) -> Arc<Mutex<RoundVotes>> {
        if let Some(votes) = self
            .rounds
            .read()
            .expect("Locking failed")
            .get(&(period, round))
        {
            return votes.clone();
        }
        self.rounds
            .write()
            .expect("Locking failed")
            .entry((period, round))
            .or_default()
            .clone()
    }

    fn existing_round_votes(&self, period: Period, round: Round) -> Option<Arc<Mutex<RoundVotes>>> {
        self.rounds
            .read()
            .expect("Locking failed")
            .get(&(period, round))
            .cloned()
    }

    /// Add a vote that already passed [`Self::validate_vote`]
    pub fn add_verified_vote(&self, vote: SignedVote) -> VoteOutcome {
        let round_votes = self.round_votes(vote.period, vote.round);
        let res = round_votes
            .lock()
            .expect("Locking failed")
            .step_mut(vote.step)
            .insert(vote);

        match res {
            StepInsert::Known => VoteOutcome::AlreadyKnown,
            StepInsert::Conflict(first) => {
                debug!(
                    target: LOG_TARGET,
                    voter = %vote.voter.to_short(),
                    period = %vote.period,
                    round = %vote.round,
                    step = %vote.step,
                    "Conflicting vote"
                );
                self.slashing.report_equivocation(EquivocationEvidence {
                    first,
                    second: vote,
                });
                VoteOutcome::DuplicateVoter
            }
            StepInsert::Inserted => {
                trace!(
                    target: LOG_TARGET,
                    voter = %vote.voter.to_short(),
                    period = %vote.period,
                    round = %vote.round,
                    step = %vote.step,
                    block_hash = %vote.block_hash,
                    weight = %vote.weight,
                    "New vote"
                );
                let mut reward = self.reward.lock().expect("Locking failed");
                if reward.matches(&vote) {
                    reward.votes.insert(vote.vote_hash(), vote);
                }
                VoteOutcome::Accepted
            }
        }
    }

    /// Block with a 2t+1 quorum of `vote_type` votes in the given slot
    ///
    /// In next steps a value quorum is preferred over a null one.
    pub fn quorum_block(
        &self,
        period: Period,
        round: Round,
        step: Step,
        vote_type: VoteType,
    ) -> Option<BlockHash> {
        if VoteType::from_step(step) != vote_type {
            return None;
        }
        let threshold = self.two_t_plus_one(period)?;
        let round_votes = self.existing_round_votes(period, round)?;
        let mut round_votes = round_votes.lock().expect("Locking failed");
        let step_votes = round_votes.steps.get_mut(&step)?;

        if let Some(hash) = step_votes.quorum_value(threshold) {
            return Some(hash);
        }
        (vote_type == VoteType::Next && step_votes.quorum_null(threshold))
            .then_some(BlockHash::NULL)
    }

    /// First block (and the step it happened in) reaching 2t+1 of `kind`
    pub fn voted_block(
        &self,
        period: Period,
        round: Round,
        kind: VotedKind,
    ) -> Option<(BlockHash, Step)> {
        let threshold = self.two_t_plus_one(period)?;
        self.existing_round_votes(period, round)?
            .lock()
            .expect("Locking failed")
            .voted_block(kind, threshold)
    }

    pub fn votes_for(
        &self,
        period: Period,
        round: Round,
        step: Step,
        block_hash: BlockHash,
    ) -> Vec<SignedVote> {
        self.existing_round_votes(period, round)
            .and_then(|rv| {
                rv.lock()
                    .expect("Locking failed")
                    .steps
                    .get(&step)
                    .and_then(|s| s.by_block.get(&block_hash))
                    .map(|b| b.votes.clone())
            })
            .unwrap_or_default()
    }

    /// Votes behind the [`Self::voted_block`] of `kind`
    pub fn voted_block_votes(
        &self,
        period: Period,
        round: Round,
        kind: VotedKind,
    ) -> Vec<SignedVote> {
        self.voted_block(period, round, kind)
            .map(|(hash, step)| self.votes_for(period, round, step, hash))
            .unwrap_or_default()
    }

    /// Vote `voter` already cast in the slot, `null` picking which of the two
    /// next votes
    pub fn voter_vote(
        &self,
        period: Period,
        round: Round,
        step: Step,
        voter: ValidatorPubkey,
        null: bool,
    ) -> Option<SignedVote> {
        let null = null && VoteType::from_step(step) == VoteType::Next;
        self.existing_round_votes(period, round).and_then(|rv| {
            rv.lock()
                .expect("Locking failed")
                .steps
                .get(&step)
                .and_then(|s| s.by_voter.get(&(voter, null)).copied())
        })
    }

    pub fn proposal_votes(&self, period: Period, round: Round) -> Vec<SignedVote> {
        self.existing_round_votes(period, round)
            .map(|rv| {
                rv.lock()
                    .expect("Locking failed")
                    .steps
                    .get(&Step::PROPOSE)
                    .map(|s| s.by_voter.values().copied().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Round the network moved to, if ahead of `round`
    ///
    /// That is one past the highest round (at least `round`) in which some
    /// next step reached 2t+1, on a value or null.
    pub fn determine_new_round(&self, period: Period, round: Round) -> Option<Round> {
        let threshold = self.two_t_plus_one(period)?;
        let candidates: Vec<_> = self
            .rounds
            .read()
            .expect("Locking failed")
            .range((period, round)..=(period, Round::MAX))
            .map(|(k, v)| (k.1, v.clone()))
            .collect();

        candidates.into_iter().rev().find_map(|(r, rv)| {
            rv.lock()
                .expect("Locking failed")
                .has_next_vote_quorum(threshold)
                .then(|| r.next())
                .flatten()
        })
    }

    /// Highest next-vote step in which at least t+1 weight voted
    pub fn network_t_plus_one_next_voting_step(
        &self,
        period: Period,
        round: Round,
    ) -> Option<Step> {
        let threshold = self.thresholds(period)?.t_plus_one;
        let rv = self.existing_round_votes(period, round)?;
        let rv = rv.lock().expect("Locking failed");
        rv.steps
            .range(Step::FIRST_FINISH..)
            .rev()
            .find(|(_, s)| threshold <= s.unique_voters_weight())
            .map(|(step, _)| *step)
    }

    /// Drop everything about periods before `period`
    pub fn cleanup_votes_by_period(&self, period: Period) {
        let mut rounds = self.rounds.write().expect("Locking failed");
        *rounds = rounds.split_off(&(period, Round::ZERO));
        let mut thresholds = self.thresholds.lock().expect("Locking failed");
        *thresholds = thresholds.split_off(&period);
        debug!(target: LOG_TARGET, %period, "Cleaned up votes");
    }

    /// Start collecting reward votes for the block certified in the slot
    ///
    /// Takes along matching cert votes already in the ledger.
    pub fn reset_reward_votes(
        &self,
        period: Period,
        round: Round,
        step: Step,
        block_hash: BlockHash,
    ) {
        // Held across the ledger read, so a cert vote being added right now
        // ends up in one or the other.
        let mut reward = self.reward.lock().expect("Locking failed");
        let votes = self.votes_for(period, round, step, block_hash);
        reward.reset(
            RewardSlot {
                period,
                round,
                step,
                block_hash,
            },
            votes,
        );
    }

    /// Resolve the reward votes `block` references
    pub fn check_reward_votes(&self, block: &PbftBlock) -> RewardVotesResult<Vec<SignedVote>> {
        let threshold = block
            .period
            .prev()
            .and_then(|p| self.two_t_plus_one(p))
            .unwrap_or(Weight::ZERO);
        self.reward
            .lock()
            .expect("Locking failed")
            .check(block, threshold)
    }

    /// Reward votes to include in a new proposal
    pub fn reward_votes(&self) -> Vec<SignedVote> {
        self.reward
            .lock()
            .expect("Locking failed")
            .votes
            .values()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests;
