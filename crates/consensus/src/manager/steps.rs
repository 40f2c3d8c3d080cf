use dagbft_consensus_core::block::BlockHash;
use dagbft_consensus_core::period::{Round, Step};
use dagbft_consensus_core::sortition::compute_weight;
use dagbft_consensus_core::stake::Weight;
use dagbft_consensus_core::vrf::VrfSortitionCredential;
use dagbft_consensus_core::vote::SignedVote;
use dagbft_util_fmt_opt::AsFmtOption as _;
use tracing::{debug, error, info, trace};

use super::ConsensusResult;
use super::state::ConsensusState;
use crate::LOG_TARGET;
use crate::vote_manager::{VoteOutcome, VotedKind};

impl ConsensusState {
    /// Previous round ended with a 2t+1 of null next votes
    ///
    /// Always true in the first round, as there's nothing to carry over.
    fn prev_round_null_quorum(&self) -> bool {
        let Some(prev_round) = self.prev_round() else {
            return true;
        };
        self.shared
            .vote_manager
            .voted_block(self.period, prev_round, VotedKind::NextVotedNull)
            .is_some()
    }

    fn prev_round_next_voted_value(&self) -> Option<BlockHash> {
        let prev_round = self.prev_round()?;
        self.shared
            .vote_manager
            .voted_block(self.period, prev_round, VotedKind::NextVoted)
            .map(|(hash, _)| hash)
    }

    fn prev_round(&self) -> Option<Round> {
        self.round.prev().filter(|r| Round::ZERO < *r)
    }

    /// Own credential and weight in the current slot, `None` if zero
    fn own_sortition(&self) -> ConsensusResult<Option<(VrfSortitionCredential, Weight)>> {
        let Some(keys) = self.keys else {
            return Ok(None);
        };
        let credential = keys.credential(self.period, self.round, self.step)?;
        let dpos = &self.shared.dpos;
        let (Ok(own), Ok(total)) = (
            dpos.stake_of(keys.pubkey(), self.period),
            dpos.total_eligible_stake(self.period),
        ) else {
            return Ok(None);
        };
        let weight = compute_weight(&credential, own, total, &self.shared.config.sortition);
        Ok((!weight.is_zero()).then_some((credential, weight)))
    }

    /// Sign and record own vote in the current slot
    ///
    /// `None` if sortition gave us no weight. Never votes twice in a slot: if
    /// we did already (e.g. before a restart), the existing vote is returned.
    pub(super) fn place_vote(
        &mut self,
        block_hash: BlockHash,
    ) -> ConsensusResult<Option<SignedVote>> {
        let Some(keys) = self.keys else {
            return Ok(None);
        };
        let (period, round, step) = (self.period, self.round, self.step);
        let shared = self.shared.clone();
        let vm = &shared.vote_manager;

        if let Some(existing) =
            vm.voter_vote(period, round, step, keys.pubkey(), block_hash.is_null())
        {
            return Ok(Some(existing));
        }

        let Some((credential, weight)) = self.own_sortition()? else {
            trace!(target: LOG_TARGET, %period, %round, %step, "Not eligible in this step");
            return Ok(None);
        };

        let vote = keys.sign_vote_with_credential(block_hash, credential, weight);
        match vm.add_verified_vote(vote) {
            VoteOutcome::Accepted => {}
            outcome => {
                error!(target: LOG_TARGET, ?outcome, %period, %round, %step, "Own vote not accepted");
                return Ok(None);
            }
        }
        shared.storage.persist_vote(&vote)?;
        debug!(
            target: LOG_TARGET,
            %period,
            %round,
            %step,
            %block_hash,
            %weight,
            vote_type = %vote.vote_type,
            "Voted"
        );
        self.own_votes.push(vote);
        Ok(Some(vote))
    }

    fn broadcast_own(&self, vote: SignedVote) {
        self.shared.network.broadcast_vote(vote);
    }

    /// Step 1
    pub(super) fn propose_block(&mut self) -> ConsensusResult<()> {
        if let Some(keys) = self.keys {
            let existing = self.shared.vote_manager.voter_vote(
                self.period,
                self.round,
                Step::PROPOSE,
                keys.pubkey(),
                false,
            );
            if let Some(vote) = existing {
                // Proposed before a restart already
                if let Some((block, _)) = self.shared.proposed.get(self.period, vote.block_hash) {
                    self.shared.network.broadcast_block(block, vote);
                }
                return Ok(());
            }
        }

        if self.prev_round_null_quorum() {
            if self.own_sortition()?.is_none() {
                return Ok(());
            }
            let Some(block) = self.create_proposal()? else {
                return Ok(());
            };
            let hash = block.block_hash();
            let Some(vote) = self.place_vote(hash)? else {
                return Ok(());
            };
            self.shared.storage.persist_block(&block)?;
            self.shared.proposed.push(block.clone());
            self.shared.proposed.mark_valid(block.period, hash);

            info!(
                target: LOG_TARGET,
                period = %self.period,
                round = %self.round,
                block_hash = %hash,
                anchor = %block.anchor_hash,
                "Proposing block"
            );
            let reward_votes = self.shared.vote_manager.reward_votes();
            if !reward_votes.is_empty() {
                self.shared.network.broadcast_votes(reward_votes);
            }
            self.shared.network.broadcast_block(block, vote);
            return Ok(());
        }

        let Some(hash) = self.prev_round_next_voted_value() else {
            return Ok(());
        };
        let Some(block) = self.valid_block(hash) else {
            debug!(target: LOG_TARGET, block_hash = %hash, "Next-voted block not available to re-propose");
            return Ok(());
        };
        let Some(vote) = self.place_vote(hash)? else {
            return Ok(());
        };
        info!(
            target: LOG_TARGET,
            period = %self.period,
            round = %self.round,
            block_hash = %hash,
            "Re-proposing block next-voted in previous round"
        );
        self.shared.network.broadcast_block(block, vote);
        Ok(())
    }

    /// Step 2: soft vote
    pub(super) fn identify_block(&mut self) -> ConsensusResult<()> {
        let candidate = if self.prev_round_null_quorum() {
            self.identify_leader_block()
        } else {
            self.prev_round_next_voted_value()
                .filter(|hash| self.valid_block(*hash).is_some())
        };

        let Some(hash) = candidate else {
            debug!(target: LOG_TARGET, period = %self.period, round = %self.round, "Nothing to soft vote");
            return Ok(());
        };
        if let Some(vote) = self.place_vote(hash)? {
            self.broadcast_own(vote);
        }
        Ok(())
    }

    /// Step 3: cert vote, at most once per round
    pub(super) fn certify_block(&mut self) -> ConsensusResult<()> {
        if self.elapsed_in_round() < 2 * self.lambda {
            error!(target: LOG_TARGET, "Certify step entered too early");
            return Ok(());
        }
        if self.cert_voted_block.is_some() {
            return Ok(());
        }

        let Some((hash, _)) =
            self.shared
                .vote_manager
                .voted_block(self.period, self.round, VotedKind::SoftVoted)
        else {
            return Ok(());
        };
        if self.valid_block(hash).is_none() {
            return Ok(());
        }

        if let Some(vote) = self.place_vote(hash)? {
            self.cert_voted_block = Some(hash);
            self.persist_round_state()?;
            self.broadcast_own(vote);
        }
        Ok(())
    }

    /// Even steps from 4 on
    pub(super) fn first_finish(&mut self) -> ConsensusResult<()> {
        let cert_voted = self
            .cert_voted_block
            .filter(|hash| self.valid_block(*hash).is_some());

        let hash = if let Some(hash) = cert_voted {
            hash
        } else if self.prev_round().is_some() && self.prev_round_null_quorum() {
            BlockHash::NULL
        } else if let Some(hash) = self
            .prev_round_next_voted_value()
            .filter(|hash| self.valid_block(*hash).is_some())
        {
            hash
        } else {
            BlockHash::NULL
        };
        trace!(
            target: LOG_TARGET,
            step = %self.step,
            cert_voted = %self.cert_voted_block.fmt_option(),
            next_vote = %hash,
            "Finish step"
        );

        if let Some(vote) = self.place_vote(hash)? {
            self.broadcast_own(vote);
        }
        Ok(())
    }

    /// Odd steps from 5 on
    pub(super) fn second_finish(&mut self) -> ConsensusResult<()> {
        if !self.next_voted_soft_value {
            if let Some((hash, _)) =
                self.shared
                    .vote_manager
                    .voted_block(self.period, self.round, VotedKind::SoftVoted)
            {
                if self.valid_block(hash).is_some() {
                    if let Some(vote) = self.place_vote(hash)? {
                        self.next_voted_soft_value = true;
                        self.persist_round_state()?;
                        self.broadcast_own(vote);
                    }
                }
            }
        }

        if !self.next_voted_null
            && self.cert_voted_block.is_none()
            && self.prev_round().is_some()
            && self.prev_round_null_quorum()
        {
            if let Some(vote) = self.place_vote(BlockHash::NULL)? {
                self.next_voted_null = true;
                self.persist_round_state()?;
                self.broadcast_own(vote);
            }
        }
        Ok(())
    }
}
