//! Validation of what peers send, done on the caller's thread
use std::time::Instant;

use dagbft_consensus_core::block::{CertifiedBlock, SignedPbftBlock};
use dagbft_consensus_core::msg::ConsensusMsg;
use dagbft_consensus_core::period::Period;
use dagbft_consensus_core::stake::Weight;
use dagbft_consensus_core::vote::{SignedVote, VoteType};
use dagbft_db::error::{DbError, DbResult};
use dagbft_util_error::fmt::FmtCompact as _;
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use tracing::{Level, debug, instrument, trace};

use super::{Event, PbftHandle, Shared};
use crate::proposed_blocks::BlockValidity;
use crate::vote_manager::{VoteError, VoteManager, VoteOutcome, VoteResult};
use crate::{InsertOutcome, LOG_TARGET};

#[derive(Debug, Snafu)]
pub enum BlockError {
    #[snafu(display("Block not signed by its beneficiary"))]
    InvalidSignature,
    #[snafu(display("Propose vote does not match the block"))]
    VoteMismatch,
    #[snafu(display("Block of period {period} is stale (current: {current})"))]
    StaleBlock { period: Period, current: Period },
    #[snafu(display("Block of period {period} is too far ahead (current: {current})"))]
    FutureBlock { period: Period, current: Period },
}

#[derive(Debug, Snafu)]
pub enum IngestError {
    #[snafu(display("Invalid vote"))]
    Vote { source: VoteError },
    #[snafu(display("Invalid block"))]
    Block { source: BlockError },
    #[snafu(display("Failed to persist"))]
    Storage { source: DbError },
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Synced blocks further than this past the current period are dropped
pub(crate) const MAX_SYNCED_AHEAD: u64 = 64;

impl Shared {
    fn notify(&self, event: Event) {
        // Fails only if the manager is gone, which is fine
        let _ = self.events_tx.send(event);
    }

    /// Ask peers for the blocks we're missing, at most once per `min_lambda`
    pub(crate) fn request_sync_throttled(&self) {
        {
            let mut last = self.last_sync_request.lock().expect("Locking failed");
            if last.is_some_and(|t| t.elapsed() < self.config.min_lambda) {
                return;
            }
            *last = Some(Instant::now());
        }
        let from = self.chain.current_period();
        debug!(target: LOG_TARGET, %from, "Requesting sync");
        self.network.request_sync(from);
    }
}

/// Checks of a proposal that don't need the ledger
fn check_proposal(
    block: &SignedPbftBlock,
    vote: &SignedVote,
    current: Period,
) -> Result<(), BlockError> {
    block
        .verify_sig_validator(block.beneficiary)
        .ok()
        .context(InvalidSignatureSnafu)?;
    ensure!(
        vote.vote_type == VoteType::Propose
            && vote.block_hash == block.block_hash()
            && vote.period == block.period
            && vote.voter == block.beneficiary,
        VoteMismatchSnafu
    );

    let period = block.period;
    ensure!(current <= period, StaleBlockSnafu { period, current });
    ensure!(
        period <= current.saturating_add(1),
        FutureBlockSnafu { period, current }
    );
    Ok(())
}

impl PbftHandle {
    pub fn handle_msg(&self, msg: ConsensusMsg) -> IngestResult<()> {
        trace!(target: LOG_TARGET, kind = msg.kind(), "Incoming message");
        match msg {
            ConsensusMsg::Vote(vote) => {
                self.submit_vote(vote)?;
            }
            ConsensusMsg::VotesBundle(votes) => {
                for vote in votes {
                    match self.submit_bundled_vote(vote) {
                        Ok(_) => {}
                        Err(err @ IngestError::Storage { .. }) => return Err(err),
                        Err(err) => {
                            trace!(target: LOG_TARGET, err = %err.fmt_compact(), "Ignoring bundled vote");
                        }
                    }
                }
            }
            ConsensusMsg::ProposedBlock { block, vote } => {
                self.submit_block(block, vote)?;
            }
            ConsensusMsg::SyncedPeriod(block) => {
                self.submit_synced(block)?;
            }
        }
        Ok(())
    }

    /// Validate and record a vote from the network
    pub fn submit_vote(&self, vote: SignedVote) -> IngestResult<VoteOutcome> {
        self.ingest_vote(vote, VoteManager::validate_vote)
    }

    /// Like [`Self::submit_vote`], for votes that came in a bundle
    ///
    /// Bundled cert and next votes are accepted from any round of the
    /// period, so a node left behind can still learn why its peers moved on.
    fn submit_bundled_vote(&self, vote: SignedVote) -> IngestResult<VoteOutcome> {
        match vote.vote_type {
            VoteType::Cert | VoteType::Next => {
                self.ingest_vote(vote, VoteManager::validate_vote_any_round)
            }
            VoteType::Propose | VoteType::Soft => self.submit_vote(vote),
        }
    }

    fn ingest_vote(
        &self,
        vote: SignedVote,
        validate: fn(&VoteManager, &SignedVote) -> VoteResult<Weight>,
    ) -> IngestResult<VoteOutcome> {
        let shared = &self.shared;
        let vm = &shared.vote_manager;

        if let Err(err) = validate(vm, &vote) {
            if matches!(err, VoteError::FutureVote { .. }) {
                shared.request_sync_throttled();
            }
            return Err(err).context(VoteSnafu);
        }

        let outcome = vm.add_verified_vote(vote);
        if outcome == VoteOutcome::Accepted {
            shared.storage.persist_vote(&vote).context(StorageSnafu)?;
            if vm.current_period() < vote.period {
                shared.request_sync_throttled();
            }
            shared.notify(Event::NewVote);
        }
        Ok(outcome)
    }

    /// Validate and record a proposal, along with its propose vote
    #[instrument(skip_all,
        fields(period = %block.period, beneficiary = %block.beneficiary.to_short()),
        err(level = Level::DEBUG))]
    pub fn submit_block(
        &self,
        block: SignedPbftBlock,
        vote: SignedVote,
    ) -> IngestResult<InsertOutcome<BlockValidity>> {
        let shared = &self.shared;
        let vm = &shared.vote_manager;
        let hash = block.block_hash();
        let period = block.period;

        check_proposal(&block, &vote, vm.current_period()).context(BlockSnafu)?;
        vm.validate_vote(&vote).context(VoteSnafu)?;

        let outcome = shared.proposed.push(block.clone());
        if outcome.is_inserted() {
            shared.storage.persist_block(&block).context(StorageSnafu)?;
            debug!(target: LOG_TARGET, %period, block_hash = %hash, "New proposed block");
        }
        if vm.add_verified_vote(vote) == VoteOutcome::Accepted {
            shared.storage.persist_vote(&vote).context(StorageSnafu)?;
        }
        shared.notify(Event::NewVote);
        Ok(outcome)
    }

    /// Queue a block the network certified, for the manager to verify and
    /// apply once it reaches its period
    pub fn submit_synced(&self, block: CertifiedBlock) -> IngestResult<()> {
        let current = self.shared.chain.current_period();
        let period = block.period();
        if period < current {
            return Err(BlockError::StaleBlock { period, current }).context(BlockSnafu);
        }
        if current.saturating_add(MAX_SYNCED_AHEAD) < period {
            return Err(BlockError::FutureBlock { period, current }).context(BlockSnafu);
        }
        self.shared.notify(Event::SyncedPeriod(Box::new(block)));
        Ok(())
    }

    /// Certified blocks from `from` on, to serve a peer's sync request
    pub fn certified_blocks(&self, from: Period, limit: usize) -> DbResult<Vec<CertifiedBlock>> {
        let mut blocks = vec![];
        let mut period = from.max(Period::FIRST);
        while blocks.len() < limit {
            let Some(block) = self.shared.chain.get(period)? else {
                break;
            };
            blocks.push(block);
            let Some(next) = period.next() else {
                break;
            };
            period = next;
        }
        Ok(blocks)
    }
}
