//! Collaborators the consensus is driven by, but does not own
//!
//! The DAG, the executor, stake distribution, the network and the database
//! all live outside of this crate. The manager only sees them through these
//! traits, so they can be swapped for simulated ones in tests.
use std::sync::Arc;

use dagbft_consensus_core::block::{
    BlockHash, CertifiedBlock, DagBlockHash, SignedPbftBlock, StateRoot,
};
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::stake::Stake;
use dagbft_consensus_core::validator::ValidatorPubkey;
use dagbft_consensus_core::vote::SignedVote;
use dagbft_consensus_core::vrf::VrfPubkey;
use dagbft_db::error::DbResult;
use snafu::Snafu;
use tracing::warn;

use crate::LOG_TARGET;
use crate::storage::RoundState;

#[derive(Debug, Snafu)]
pub enum DposError {
    /// The stake snapshot of the period is gone (or not there yet)
    #[snafu(display("No DPOS snapshot for period {period}"))]
    SnapshotUnavailable { period: Period },
}

pub type DposResult<T> = Result<T, DposError>;

/// Stake distribution, as of a given period
pub trait DposView: Send + Sync {
    fn total_eligible_stake(&self, period: Period) -> DposResult<Stake>;

    fn stake_of(&self, validator: ValidatorPubkey, period: Period) -> DposResult<Stake>;

    /// `Ok(None)` if `validator` is not a known validator in `period`
    fn vrf_pubkey_of(
        &self,
        validator: ValidatorPubkey,
        period: Period,
    ) -> DposResult<Option<VrfPubkey>>;
}

/// Most recent point of the DAG a new block could anchor on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontier {
    /// `None` if there's no DAG block to anchor on at all
    pub pivot: Option<DagBlockHash>,
    pub tips: Vec<DagBlockHash>,
}

#[derive(Debug, Snafu)]
pub enum DagOrderError {
    /// The anchor was already ordered by an earlier period
    #[snafu(display("Anchor {anchor} already ordered"))]
    AlreadyOrdered { anchor: DagBlockHash },
    /// We don't have the anchor (yet)
    #[snafu(display("Anchor {anchor} unknown"))]
    UnknownAnchor { anchor: DagBlockHash },
}

#[derive(Debug, Snafu)]
#[snafu(display("Execution of period {period} failed: {reason}"))]
pub struct ExecutionError {
    pub period: Period,
    pub reason: String,
}

/// The DAG and the state executor sitting on top of it
pub trait FinalChain: Send + Sync {
    fn current_frontier(&self) -> Frontier;

    /// Deterministic order of DAG blocks `anchor` finalizes in `period`
    ///
    /// Everything reachable from `anchor` not already ordered in an earlier
    /// period, with `anchor` itself last.
    fn dag_order(
        &self,
        anchor: DagBlockHash,
        period: Period,
    ) -> Result<Vec<DagBlockHash>, DagOrderError>;

    /// State root after executing `period`, `None` if we're not there yet
    fn state_root(&self, period: Period) -> Option<StateRoot>;

    fn execute_period(
        &self,
        period: Period,
        anchor: DagBlockHash,
        order: &[DagBlockHash],
    ) -> Result<StateRoot, ExecutionError>;
}

/// Gossip layer
///
/// All sends are fire and forget; delivery is not guaranteed.
pub trait Network: Send + Sync {
    fn broadcast_vote(&self, vote: SignedVote);

    fn broadcast_votes(&self, votes: Vec<SignedVote>);

    fn broadcast_block(&self, block: SignedPbftBlock, vote: SignedVote);

    /// Ask peers for certified blocks starting with `from`
    fn request_sync(&self, from: Period);
}

/// Durable consensus state
///
/// Anything failing here is fatal to the manager.
pub trait Storage: Send + Sync {
    fn persist_vote(&self, vote: &SignedVote) -> DbResult<()>;

    fn persist_block(&self, block: &SignedPbftBlock) -> DbResult<()>;

    fn load_round_state(&self) -> DbResult<Option<RoundState>>;

    fn save_round_state(&self, state: &RoundState) -> DbResult<()>;

    fn append_certified(&self, block: &CertifiedBlock) -> DbResult<()>;

    fn load_certified(&self, period: Period) -> DbResult<Option<CertifiedBlock>>;

    /// Hashes of all certified blocks, in period order
    fn load_chain_hashes(&self) -> DbResult<Vec<BlockHash>>;

    fn load_proposed_blocks(&self) -> DbResult<Vec<SignedPbftBlock>>;

    /// All votes from `from` on
    fn load_votes(&self, from: Period) -> DbResult<Vec<SignedVote>>;

    /// Drop proposed blocks and votes of periods before `period`
    fn prune_below(&self, period: Period) -> DbResult<()>;
}

/// Two conflicting votes signed by the same voter in the same slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivocationEvidence {
    pub first: SignedVote,
    pub second: SignedVote,
}

impl EquivocationEvidence {
    pub fn voter(&self) -> ValidatorPubkey {
        self.first.voter
    }

    pub fn slot(&self) -> (Period, Round, Step) {
        (self.first.period, self.first.round, self.first.step)
    }
}

pub trait SlashingReporter: Send + Sync {
    fn report_equivocation(&self, evidence: EquivocationEvidence);
}

/// [`SlashingReporter`] that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSlashingReporter;

impl SlashingReporter for LoggingSlashingReporter {
    fn report_equivocation(&self, evidence: EquivocationEvidence) {
        let (period, round, step) = evidence.slot();
        warn!(
            target: LOG_TARGET,
            voter = %evidence.voter().to_short(),
            %period,
            %round,
            %step,
            first = %evidence.first.block_hash,
            second = %evidence.second.block_hash,
            "Equivocating voter"
        );
    }
}

pub type DposViewArc = Arc<dyn DposView>;
pub type FinalChainArc = Arc<dyn FinalChain>;
pub type NetworkArc = Arc<dyn Network>;
pub type StorageArc = Arc<dyn Storage>;
pub type SlashingReporterArc = Arc<dyn SlashingReporter>;
