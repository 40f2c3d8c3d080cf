use std::collections::BTreeSet;

use dagbft_consensus_core::block::{
    BlockHash, CertifiedBlock, DagBlockHash, OrderHash, SignedPbftBlock, StateRoot,
};
use dagbft_consensus_core::period::Period;
use dagbft_consensus_core::stake::Weight;
use dagbft_consensus_core::vote::{SignedVote, VoteType};
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use tracing::{Level, debug, info, instrument, warn};

use super::ConsensusResult;
use super::state::ConsensusState;
use crate::LOG_TARGET;
use crate::interfaces::ExecutionError;
use crate::vote_manager::{RewardVotesError, VotedKind};

/// Why a block can't be finalized (or even voted for)
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum FinalizeError {
    #[snafu(display("Block builds on {got}, chain head is {expected}"))]
    StaleParent { expected: BlockHash, got: BlockHash },
    #[snafu(display("No state root for period {period} yet"))]
    MissingStateRoot { period: Period },
    #[snafu(display("Previous state root {got}, expected {expected}"))]
    StateRootMismatch { expected: StateRoot, got: StateRoot },
    #[snafu(transparent)]
    RewardVotes { source: RewardVotesError },
    InvalidExtraData,
    #[snafu(display("Empty block with non-null order hash"))]
    UnexpectedOrderHash,
    #[snafu(display("Anchor {anchor} already ordered in an earlier period"))]
    StaleAnchor { anchor: DagBlockHash },
    #[snafu(display("Anchor {anchor} not in our DAG (yet)"))]
    UnknownAnchor { anchor: DagBlockHash },
    #[snafu(display("Anchor {anchor} orders no DAG blocks"))]
    EmptyOrder { anchor: DagBlockHash },
    #[snafu(display("Order hash {got}, block commits to {expected}"))]
    OrderHashMismatch { expected: OrderHash, got: OrderHash },
    InvalidBlockSignature,
    #[snafu(display("Invalid certificate: {reason}"))]
    InvalidCertificate { reason: &'static str },
    #[snafu(display("Execution failed"))]
    Execution { source: ExecutionError },
}

impl FinalizeError {
    /// The node can't go on: its state diverged from the chain
    pub fn is_fatal(&self) -> bool {
        matches!(self, FinalizeError::Execution { .. })
    }

    /// Might pass later, after catching up with the DAG or execution
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FinalizeError::MissingStateRoot { .. }
                | FinalizeError::UnknownAnchor { .. }
                | FinalizeError::RewardVotes {
                    source: RewardVotesError::MissingRewardVotes { .. }
                }
        )
    }
}

impl ConsensusState {
    /// Finalize the block of the current round that got a cert vote quorum
    ///
    /// Returns `true` if the chain moved to the next period.
    pub(super) fn try_push_cert_votes_block(&mut self) -> ConsensusResult<bool> {
        let shared = self.shared.clone();
        let vm = &shared.vote_manager;
        let Some((hash, step)) = vm.voted_block(self.period, self.round, VotedKind::CertVoted)
        else {
            return Ok(false);
        };
        if shared.chain.contains(hash) {
            return Ok(false);
        }

        let Some(block) = self.valid_block(hash) else {
            if !shared.proposed.contains(self.period, hash) {
                debug!(target: LOG_TARGET, block_hash = %hash, "Certified block missing, requesting sync");
                shared.request_sync_throttled();
            }
            return Ok(false);
        };
        let cert_votes = vm.votes_for(self.period, self.round, step, hash);
        self.push_block(block, cert_votes)
    }

    /// Re-check `block` against the current chain and DAG, execute it and
    /// append it
    fn push_block(
        &mut self,
        block: SignedPbftBlock,
        cert_votes: Vec<SignedVote>,
    ) -> ConsensusResult<bool> {
        let hash = block.block_hash();
        let order = match self.final_order(&block) {
            Ok(order) => order,
            Err(err) if err.is_transient() => {
                debug!(target: LOG_TARGET, block_hash = %hash, %err, "Can't finalize block yet");
                return Ok(false);
            }
            Err(err) => {
                warn!(target: LOG_TARGET, block_hash = %hash, %err, "Certified block can't be finalized");
                self.shared.proposed.mark_invalid(block.period, hash);
                self.order_cache.remove(&hash);
                return Ok(false);
            }
        };
        self.commit_block(block, cert_votes, order)?;
        Ok(true)
    }

    /// DAG order to execute `block` with, re-checked fresh
    ///
    /// Anything could have been ordered in between voting and now, so the
    /// cached order is not trusted here.
    fn final_order(&self, block: &SignedPbftBlock) -> Result<Vec<DagBlockHash>, FinalizeError> {
        self.check_parent(block)?;
        self.shared.vote_manager.check_reward_votes(block)?;
        if block.anchor_hash.is_null() {
            ensure!(block.order_hash.is_null(), UnexpectedOrderHashSnafu);
            return Ok(vec![]);
        }
        self.dag_order(block)
    }

    #[instrument(skip_all,
        fields(period = %block.period, block_hash = %block.block_hash()),
        err(level = Level::DEBUG))]
    fn commit_block(
        &mut self,
        block: SignedPbftBlock,
        cert_votes: Vec<SignedVote>,
        order: Vec<DagBlockHash>,
    ) -> ConsensusResult<()> {
        let shared = self.shared.clone();
        let period = block.period;
        let hash = block.block_hash();

        let state_root = shared
            .final_chain
            .execute_period(period, block.anchor_hash, &order)
            .context(ExecutionSnafu)?;

        let cert_slot = cert_votes.first().map(|v| (v.round, v.step));
        let num_dag_blocks = order.len();
        shared.chain.append(CertifiedBlock {
            block,
            cert_votes,
            state_root,
            order,
        })?;
        info!(
            target: LOG_TARGET,
            %period,
            round = %self.round,
            block_hash = %hash,
            %state_root,
            num_dag_blocks,
            "Finalized block"
        );

        if let Some((round, step)) = cert_slot {
            shared
                .vote_manager
                .reset_reward_votes(period, round, step, hash);
        }
        self.advance_period()?;
        Ok(())
    }

    /// Apply a block the network already certified, if we have the one for
    /// the current period
    pub(super) fn process_synced(&mut self) -> ConsensusResult<bool> {
        self.synced = self.synced.split_off(&self.period);
        let Some(certified) = self.synced.remove(&self.period) else {
            return Ok(false);
        };

        let hash = certified.block_hash();
        if self.shared.chain.contains(hash) {
            return Ok(false);
        }
        let order = match self.verify_synced(&certified) {
            Ok(order) => order,
            Err(err) if err.is_transient() => {
                debug!(target: LOG_TARGET, block_hash = %hash, %err, "Can't apply synced block yet");
                self.synced.insert(self.period, certified);
                return Ok(false);
            }
            Err(err) => {
                warn!(target: LOG_TARGET, block_hash = %hash, %err, "Invalid synced block");
                return Ok(false);
            }
        };

        let CertifiedBlock {
            block, cert_votes, ..
        } = certified;
        for vote in &cert_votes {
            self.shared.vote_manager.add_verified_vote(*vote);
        }
        debug!(target: LOG_TARGET, period = %self.period, block_hash = %hash, "Applying synced block");
        self.commit_block(block, cert_votes, order)?;
        Ok(true)
    }

    /// Check a certified block from a peer, returning the order to execute
    fn verify_synced(
        &self,
        certified: &CertifiedBlock,
    ) -> Result<Vec<DagBlockHash>, FinalizeError> {
        let block = &certified.block;
        let hash = block.block_hash();
        block
            .verify_sig_validator(block.beneficiary)
            .ok()
            .context(InvalidBlockSignatureSnafu)?;
        self.check_parent(block)?;
        self.verify_cert_votes(hash, block.period, &certified.cert_votes)?;

        if block.anchor_hash.is_null() {
            ensure!(block.order_hash.is_null(), UnexpectedOrderHashSnafu);
            return Ok(vec![]);
        }
        self.dag_order(block)
    }

    fn verify_cert_votes(
        &self,
        hash: BlockHash,
        period: Period,
        cert_votes: &[SignedVote],
    ) -> Result<(), FinalizeError> {
        let vm = &self.shared.vote_manager;
        let first = cert_votes.first().context(InvalidCertificateSnafu {
            reason: "no cert votes",
        })?;

        let mut voters = BTreeSet::new();
        let mut weight = Weight::ZERO;
        for vote in cert_votes {
            ensure!(
                vote.vote_type == VoteType::Cert
                    && vote.block_hash == hash
                    && vote.period == period
                    && vote.round == first.round
                    && vote.step == first.step,
                InvalidCertificateSnafu {
                    reason: "vote not for the block",
                }
            );
            ensure!(
                voters.insert(vote.voter),
                InvalidCertificateSnafu {
                    reason: "duplicate voter",
                }
            );
            let vote_weight = vm.validate_vote_any_round(vote).ok().context(InvalidCertificateSnafu {
                reason: "invalid vote",
            })?;
            weight = weight.saturating_add(vote_weight);
        }

        let threshold = vm
            .two_t_plus_one(period)
            .context(InvalidCertificateSnafu {
                reason: "no stake snapshot",
            })?;
        ensure!(
            threshold <= weight,
            InvalidCertificateSnafu {
                reason: "not enough weight",
            }
        );
        Ok(())
    }
}
