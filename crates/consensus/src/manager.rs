//! The PBFT state machine
//!
//! [`PbftManager::start`] moves the consensus state onto a dedicated thread
//! running a blocking loop, and hands back a cloneable [`PbftHandle`]. The
//! handle is how the rest of the node talks to consensus: it validates
//! incoming votes and blocks right away (on the caller's thread) and only
//! wakes the loop up when something was accepted.
//!
//! Every round goes through `propose -> filter -> certify -> finish ->
//! finish polling`, with the last two alternating until either a block gets
//! certified (moving to the next period) or the network agrees to move to
//! the next round.
mod block;
mod finalize;
mod ingest;
mod state;
mod steps;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use dagbft_consensus_core::block::{BlockHash, CertifiedBlock};
use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::vrf::SortitionError;
use dagbft_db::error::{DbError, DbResult};
use dagbft_util_error::fmt::FmtCompact as _;
pub use finalize::FinalizeError;
pub use ingest::{BlockError, IngestError, IngestResult};
use snafu::{ResultExt as _, Snafu};
use tokio::sync::watch;
use tracing::{error, info};

use crate::LOG_TARGET;
use crate::config::{ConfigError, PbftConfig};
use crate::interfaces::{
    DposViewArc, FinalChainArc, LoggingSlashingReporter, NetworkArc, SlashingReporterArc,
    StorageArc,
};
use crate::pbft_chain::{ChainError, PbftChain};
use crate::proposed_blocks::ProposedBlocks;
use crate::vote_manager::VoteManager;

/// Where in a round the state machine is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbftState {
    ValueProposal,
    Filter,
    Certify,
    Finish,
    FinishPolling,
}

impl fmt::Display for PbftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PbftState::ValueProposal => "value_proposal",
            PbftState::Filter => "filter",
            PbftState::Certify => "certify",
            PbftState::Finish => "finish",
            PbftState::FinishPolling => "finish_polling",
        })
    }
}

/// Snapshot of the state machine, published on every change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbftStatus {
    pub period: Period,
    pub round: Round,
    pub step: Step,
    pub state: PbftState,
    pub chain_size: u64,
    pub last_block_hash: BlockHash,
    /// Set when the manager stopped on a fatal error
    pub halted: Option<String>,
}

impl PbftStatus {
    fn initial(chain: &PbftChain) -> Self {
        Self {
            period: chain.current_period(),
            round: Round::FIRST,
            step: Step::PROPOSE,
            state: PbftState::ValueProposal,
            chain_size: chain.size(),
            last_block_hash: chain.last_block_hash(),
            halted: None,
        }
    }
}

/// Fatal errors, ending the manager loop
#[derive(Debug, Snafu)]
pub enum ConsensusError {
    #[snafu(transparent)]
    Finalize { source: FinalizeError },
    #[snafu(transparent)]
    Chain { source: ChainError },
    #[snafu(transparent)]
    Storage { source: DbError },
    #[snafu(transparent)]
    Sortition { source: SortitionError },
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;

#[derive(Debug, Snafu)]
pub enum StartError {
    #[snafu(transparent)]
    Config { source: ConfigError },
    #[snafu(display("Failed to restore consensus state"))]
    Restore { source: DbError },
    #[snafu(transparent)]
    Sortition { source: SortitionError },
    #[snafu(display("Failed to spawn consensus thread"))]
    Spawn { source: std::io::Error },
}

pub type StartResult<T> = Result<T, StartError>;

/// Wake-ups for the manager loop
pub(crate) enum Event {
    /// Something got added to the vote ledger or proposed blocks
    NewVote,
    /// A block certified by the network, for a period we're missing
    SyncedPeriod(Box<CertifiedBlock>),
}

/// What both the loop and the handles need
pub(crate) struct Shared {
    pub config: PbftConfig,
    pub vote_manager: VoteManager,
    pub proposed: ProposedBlocks,
    pub chain: PbftChain,
    pub dpos: DposViewArc,
    pub final_chain: FinalChainArc,
    pub network: NetworkArc,
    pub storage: StorageArc,
    pub events_tx: crossbeam_channel::Sender<Event>,
    pub status_tx: watch::Sender<PbftStatus>,
    /// Last time a sync was requested, to not flood peers
    pub last_sync_request: Mutex<Option<Instant>>,
}

pub struct PbftManager {
    shared: Arc<Shared>,
    keys: Option<ValidatorKeys>,
    events_rx: crossbeam_channel::Receiver<Event>,
}

#[bon::bon]
impl PbftManager {
    /// Restore consensus state from `storage`, without starting anything yet
    ///
    /// Without `keys` the node only follows the chain.
    #[builder]
    pub fn new(
        #[builder(default)] config: PbftConfig,
        keys: Option<ValidatorKeys>,
        dpos: DposViewArc,
        final_chain: FinalChainArc,
        network: NetworkArc,
        storage: StorageArc,
        slashing: Option<SlashingReporterArc>,
    ) -> StartResult<Self> {
        config.validate()?;

        let slashing = slashing.unwrap_or_else(|| Arc::new(LoggingSlashingReporter));
        let chain = PbftChain::load(storage.clone()).context(RestoreSnafu)?;
        let vote_manager = VoteManager::new(dpos.clone(), config.sortition, slashing)
            .with_window(config.vote_window());
        vote_manager.set_current_period(chain.current_period());

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (status_tx, _) = watch::channel(PbftStatus::initial(&chain));

        let shared = Arc::new(Shared {
            config,
            vote_manager,
            proposed: ProposedBlocks::new(),
            chain,
            dpos,
            final_chain,
            network,
            storage,
            events_tx,
            status_tx,
            last_sync_request: Mutex::new(None),
        });

        Ok(Self {
            shared,
            keys,
            events_rx,
        })
    }
}

impl PbftManager {
    /// Spawn the manager thread
    pub fn start(self) -> StartResult<PbftHandle> {
        let Self {
            shared,
            keys,
            events_rx,
        } = self;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

        let state = state::ConsensusState::restore(shared.clone(), keys, events_rx, stop_rx)
            .context(RestoreSnafu)?;
        let name = match keys {
            Some(keys) => format!("pbft-{}", keys.pubkey().to_short()),
            None => "pbft-observer".to_owned(),
        };
        info!(target: LOG_TARGET, %name, period = %shared.chain.current_period(), "Starting consensus");

        let thread = std::thread::Builder::new()
            .name(name)
            .spawn({
                let shared = shared.clone();
                move || {
                    let res = state.run();
                    if let Err(err) = &res {
                        error!(target: LOG_TARGET, err = %err.fmt_compact(), "Consensus halted");
                        shared.status_tx.send_modify(|status| {
                            status.halted = Some(err.fmt_compact().to_string());
                        });
                    }
                    res
                }
            })
            .context(SpawnSnafu)?;

        Ok(PbftHandle {
            status_rx: shared.status_tx.subscribe(),
            shared,
            control: Arc::new(Control {
                stop_tx: Mutex::new(Some(stop_tx)),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }
}

struct Control {
    stop_tx: Mutex<Option<crossbeam_channel::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<ConsensusResult<()>>>>,
}

/// Cloneable handle to a running [`PbftManager`]
///
/// Dropping the last one stops the manager.
#[derive(Clone)]
pub struct PbftHandle {
    shared: Arc<Shared>,
    status_rx: watch::Receiver<PbftStatus>,
    control: Arc<Control>,
}

impl PbftHandle {
    pub fn status(&self) -> watch::Receiver<PbftStatus> {
        self.status_rx.clone()
    }

    pub fn chain_size(&self) -> u64 {
        self.shared.chain.size()
    }

    pub fn certified_block(&self, period: Period) -> DbResult<Option<CertifiedBlock>> {
        self.shared.chain.get(period)
    }

    pub fn vote_manager(&self) -> &VoteManager {
        &self.shared.vote_manager
    }

    /// Stop the manager and wait for it to finish
    ///
    /// Returns the fatal error that stopped it earlier, if any. Only the
    /// first call does anything.
    pub fn stop(&self) -> ConsensusResult<()> {
        // Dropping the sender is what signals the loop
        self.control.stop_tx.lock().expect("Locking failed").take();
        let Some(thread) = self.control.thread.lock().expect("Locking failed").take() else {
            return Ok(());
        };
        thread.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    }
}
