use dagbft_consensus_core::block::{
    BlockHash, DagBlockHash, ExtraData, PbftBlock, SignedPbftBlock, calculate_order_hash,
};
use dagbft_consensus_core::period::Period;
use dagbft_consensus_core::sortition::proposal_priority;
use snafu::{OptionExt as _, ensure};
use tracing::{debug, trace, warn};

use super::ConsensusResult;
use super::finalize::{
    EmptyOrderSnafu, FinalizeError, InvalidExtraDataSnafu, MissingStateRootSnafu,
    OrderHashMismatchSnafu, StaleParentSnafu, StateRootMismatchSnafu, UnexpectedOrderHashSnafu,
};
use super::state::ConsensusState;
use crate::LOG_TARGET;
use crate::interfaces::DagOrderError;
use crate::proposed_blocks::BlockValidity;

impl ConsensusState {
    /// Build and sign a new block for the current period
    ///
    /// Anchored on the DAG pivot, unless nothing new got into the DAG since
    /// the last anchor, which makes it an empty (null anchor) block.
    pub(super) fn create_proposal(&mut self) -> ConsensusResult<Option<SignedPbftBlock>> {
        let Some(keys) = self.keys else {
            return Ok(None);
        };
        let shared = self.shared.clone();
        let period = self.period;

        let prev_period = period.prev().unwrap_or(Period::ZERO);
        let Some(prev_state_root) = shared.final_chain.state_root(prev_period) else {
            debug!(target: LOG_TARGET, %prev_period, "Execution behind, not proposing");
            return Ok(None);
        };

        let (anchor, order) = match shared.final_chain.current_frontier().pivot {
            None => (DagBlockHash::NULL, vec![]),
            Some(pivot) => match shared.final_chain.dag_order(pivot, period) {
                Ok(order) if !order.is_empty() => (pivot, order),
                Ok(_) => (DagBlockHash::NULL, vec![]),
                Err(err) => {
                    trace!(target: LOG_TARGET, %pivot, %err, "Pivot not orderable, proposing empty block");
                    (DagBlockHash::NULL, vec![])
                }
            },
        };

        let reward_votes = if Period::FIRST < period {
            shared
                .vote_manager
                .reward_votes()
                .iter()
                .map(|v| v.vote_hash())
                .collect()
        } else {
            vec![]
        };

        let block = keys.sign_block(
            PbftBlock::builder()
                .period(period)
                .prev_block_hash(shared.chain.last_block_hash())
                .anchor_hash(anchor)
                .order_hash(calculate_order_hash(&order))
                .prev_state_root(prev_state_root)
                .beneficiary(keys.pubkey())
                .reward_votes(reward_votes)
                .maybe_extra_data(shared.config.extra_data_version.clone().map(|version| {
                    ExtraData {
                        version,
                        pillar_block_hash: None,
                    }
                }))
                .build(),
        );
        if !anchor.is_null() {
            self.order_cache.insert(block.block_hash(), (anchor, order));
        }
        Ok(Some(block))
    }

    /// Proposal with the best sortition priority we can vote for
    ///
    /// Blocks anchoring new DAG blocks win over empty ones, no matter the
    /// priority.
    pub(super) fn identify_leader_block(&mut self) -> Option<BlockHash> {
        let votes = self
            .shared
            .vote_manager
            .proposal_votes(self.period, self.round);

        let mut candidates: Vec<_> = votes
            .iter()
            .filter_map(|v| {
                proposal_priority(v.credential.output, v.voter, v.weight).map(|p| (p, v.block_hash))
            })
            .collect();
        candidates.sort();

        let mut empty_fallback = None;
        for (priority, hash) in candidates {
            if hash.is_null() || self.shared.chain.contains(hash) {
                continue;
            }
            let Some(block) = self.valid_block(hash) else {
                continue;
            };
            if !block.is_empty() {
                trace!(target: LOG_TARGET, block_hash = %hash, %priority, "Leader");
                return Some(hash);
            }
            empty_fallback.get_or_insert(hash);
        }
        empty_fallback
    }

    /// Proposed block of the current period, if it's valid
    ///
    /// Validated on first use, remembering the verdict. Failures that might
    /// go away once we catch up are not remembered.
    pub(super) fn valid_block(&mut self, hash: BlockHash) -> Option<SignedPbftBlock> {
        let (block, validity) = self.shared.proposed.get(self.period, hash)?;
        match validity {
            BlockValidity::Valid => Some(block),
            BlockValidity::Invalid => None,
            BlockValidity::Unchecked => match self.validate_block(&block) {
                Ok(()) => {
                    self.shared.proposed.mark_valid(self.period, hash);
                    Some(block)
                }
                Err(err) if err.is_transient() => {
                    debug!(target: LOG_TARGET, block_hash = %hash, %err, "Can't validate block yet");
                    None
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, block_hash = %hash, %err, "Invalid block");
                    self.shared.proposed.mark_invalid(self.period, hash);
                    None
                }
            },
        }
    }

    fn validate_block(&mut self, block: &SignedPbftBlock) -> Result<(), FinalizeError> {
        let shared = self.shared.clone();
        self.check_parent(block)?;

        let prev_period = block.period.prev().unwrap_or(Period::ZERO);
        let prev_state_root = shared
            .final_chain
            .state_root(prev_period)
            .context(MissingStateRootSnafu {
                period: prev_period,
            })?;
        ensure!(
            prev_state_root == block.prev_state_root,
            StateRootMismatchSnafu {
                expected: prev_state_root,
                got: block.prev_state_root,
            }
        );

        shared.vote_manager.check_reward_votes(block)?;

        if let Some(version) = &shared.config.extra_data_version {
            ensure!(
                block
                    .extra_data
                    .as_ref()
                    .is_some_and(|extra| &extra.version == version),
                InvalidExtraDataSnafu
            );
        }

        if block.anchor_hash.is_null() {
            ensure!(block.order_hash.is_null(), UnexpectedOrderHashSnafu);
            return Ok(());
        }

        let hash = block.block_hash();
        if self.order_cache.contains_key(&hash) {
            return Ok(());
        }
        let order = self.dag_order(block)?;
        self.order_cache.insert(hash, (block.anchor_hash, order));
        Ok(())
    }

    pub(super) fn check_parent(&self, block: &PbftBlock) -> Result<(), FinalizeError> {
        let last = self.shared.chain.last_block_hash();
        ensure!(
            block.prev_block_hash == last,
            StaleParentSnafu {
                expected: last,
                got: block.prev_block_hash,
            }
        );
        Ok(())
    }

    /// DAG order of a non-empty block, checked against its order hash
    pub(super) fn dag_order(&self, block: &PbftBlock) -> Result<Vec<DagBlockHash>, FinalizeError> {
        let anchor = block.anchor_hash;
        let order = self
            .shared
            .final_chain
            .dag_order(anchor, block.period)
            .map_err(|err| match err {
                DagOrderError::AlreadyOrdered { anchor } => FinalizeError::StaleAnchor { anchor },
                DagOrderError::UnknownAnchor { anchor } => FinalizeError::UnknownAnchor { anchor },
            })?;
        ensure!(!order.is_empty(), EmptyOrderSnafu { anchor });

        let got = calculate_order_hash(&order);
        ensure!(
            got == block.order_hash,
            OrderHashMismatchSnafu {
                expected: block.order_hash,
                got,
            }
        );
        Ok(order)
    }
}
