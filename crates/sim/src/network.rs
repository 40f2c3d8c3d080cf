use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use dagbft_consensus::interfaces::Network;
use dagbft_consensus::manager::PbftHandle;
use dagbft_consensus_core::block::SignedPbftBlock;
use dagbft_consensus_core::msg::ConsensusMsg;
use dagbft_consensus_core::period::Period;
use dagbft_consensus_core::vote::SignedVote;
use dagbft_util_error::fmt::FmtCompact as _;
use tracing::{debug, trace};

use crate::LOG_TARGET;

pub type NodeIdx = usize;

/// Most certified blocks served per sync request
const SYNC_BATCH: usize = 16;

enum Envelope {
    Broadcast { from: NodeIdx, msg: ConsensusMsg },
    SyncRequest { from: NodeIdx, period: Period },
}

#[derive(Default)]
struct Routes {
    nodes: BTreeMap<NodeIdx, PbftHandle>,
    /// Neither send nor receive anything
    muted: BTreeSet<NodeIdx>,
}

impl Routes {
    fn is_connected(&self, idx: NodeIdx) -> bool {
        !self.muted.contains(&idx)
    }
}

/// Delivers messages between the nodes of a simulation
///
/// A single router thread hands every message to the
/// [`PbftHandle`]s of all other registered nodes, in the order they were
/// sent. Sync requests get served by any node that has the blocks.
pub struct SimNetwork {
    tx: Sender<Envelope>,
    routes: Arc<RwLock<Routes>>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SimNetwork {
    pub fn new() -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let routes = Arc::new(RwLock::new(Routes::default()));

        let thread = std::thread::Builder::new().name("sim-router".into()).spawn({
            let routes = routes.clone();
            move || run_router(&routes, &rx, &stop_rx)
        })?;

        Ok(Self {
            tx,
            routes,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// [`Network`] for node `idx` to send through
    pub fn node(&self, idx: NodeIdx) -> Arc<SimNodeNetwork> {
        Arc::new(SimNodeNetwork {
            idx,
            tx: self.tx.clone(),
        })
    }

    pub fn register(&self, idx: NodeIdx, handle: PbftHandle) {
        self.routes
            .write()
            .expect("Locking failed")
            .nodes
            .insert(idx, handle);
    }

    pub fn unregister(&self, idx: NodeIdx) -> Option<PbftHandle> {
        self.routes
            .write()
            .expect("Locking failed")
            .nodes
            .remove(&idx)
    }

    pub fn mute(&self, idx: NodeIdx) {
        debug!(target: LOG_TARGET, idx, "Muting node");
        self.routes
            .write()
            .expect("Locking failed")
            .muted
            .insert(idx);
    }

    pub fn unmute(&self, idx: NodeIdx) {
        debug!(target: LOG_TARGET, idx, "Unmuting node");
        self.routes
            .write()
            .expect("Locking failed")
            .muted
            .remove(&idx);
    }
}

impl Drop for SimNetwork {
    fn drop(&mut self) {
        self.stop_tx.take();
        // Handles keep the node's network (and so our channel) alive
        self.routes
            .write()
            .expect("Locking failed")
            .nodes
            .clear();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_router(routes: &RwLock<Routes>, rx: &Receiver<Envelope>, stop_rx: &Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => break,
            recv(rx) -> envelope => {
                let Ok(envelope) = envelope else {
                    break;
                };
                route(routes, envelope);
            },
        }
    }
    trace!(target: LOG_TARGET, "Router stopped");
}

fn route(routes: &RwLock<Routes>, envelope: Envelope) {
    match envelope {
        Envelope::Broadcast { from, msg } => {
            let recipients: Vec<_> = {
                let routes = routes.read().expect("Locking failed");
                if !routes.is_connected(from) {
                    return;
                }
                routes
                    .nodes
                    .iter()
                    .filter(|(idx, _)| **idx != from && routes.is_connected(**idx))
                    .map(|(idx, handle)| (*idx, handle.clone()))
                    .collect()
            };
            for (idx, handle) in recipients {
                if let Err(err) = handle.handle_msg(msg.clone()) {
                    trace!(
                        target: LOG_TARGET,
                        from,
                        to = idx,
                        kind = msg.kind(),
                        err = %err.fmt_compact(),
                        "Message rejected"
                    );
                }
            }
        }
        Envelope::SyncRequest { from, period } => {
            let (requester, servers) = {
                let routes = routes.read().expect("Locking failed");
                if !routes.is_connected(from) {
                    return;
                }
                let Some(requester) = routes.nodes.get(&from).cloned() else {
                    return;
                };
                let servers: Vec<_> = routes
                    .nodes
                    .iter()
                    .filter(|(idx, _)| **idx != from && routes.is_connected(**idx))
                    .map(|(_, handle)| handle.clone())
                    .collect();
                (requester, servers)
            };

            let Some(server) = servers
                .into_iter()
                .max_by_key(|handle| handle.chain_size())
            else {
                return;
            };
            let blocks = match server.certified_blocks(period, SYNC_BATCH) {
                Ok(blocks) => blocks,
                Err(err) => {
                    debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Failed to serve sync");
                    return;
                }
            };
            trace!(target: LOG_TARGET, to = from, %period, num = blocks.len(), "Serving sync");
            for block in blocks {
                if let Err(err) = requester.submit_synced(block) {
                    trace!(target: LOG_TARGET, err = %err.fmt_compact(), "Synced block rejected");
                }
            }
        }
    }
}

/// One node's end of a [`SimNetwork`]
pub struct SimNodeNetwork {
    idx: NodeIdx,
    tx: Sender<Envelope>,
}

impl SimNodeNetwork {
    fn send(&self, envelope: Envelope) {
        // Only fails once the network is shut down
        let _ = self.tx.send(envelope);
    }

    fn broadcast(&self, msg: ConsensusMsg) {
        self.send(Envelope::Broadcast {
            from: self.idx,
            msg,
        });
    }
}

impl Network for SimNodeNetwork {
    fn broadcast_vote(&self, vote: SignedVote) {
        self.broadcast(ConsensusMsg::Vote(vote));
    }

    fn broadcast_votes(&self, votes: Vec<SignedVote>) {
        self.broadcast(ConsensusMsg::VotesBundle(votes));
    }

    fn broadcast_block(&self, block: SignedPbftBlock, vote: SignedVote) {
        self.broadcast(ConsensusMsg::ProposedBlock { block, vote });
    }

    fn request_sync(&self, from: Period) {
        self.send(Envelope::SyncRequest {
            from: self.idx,
            period: from,
        });
    }
}

/// [`Network`] that sends nothing, only records
#[derive(Debug, Default)]
pub struct RecordingNetwork {
    sent: Mutex<Vec<ConsensusMsg>>,
    sync_requests: Mutex<Vec<Period>>,
}

impl RecordingNetwork {
    pub fn sent(&self) -> Vec<ConsensusMsg> {
        self.sent.lock().expect("Locking failed").clone()
    }

    /// Every vote sent, on its own or bundled
    pub fn votes(&self) -> Vec<SignedVote> {
        self.sent
            .lock()
            .expect("Locking failed")
            .iter()
            .flat_map(|msg| match msg {
                ConsensusMsg::Vote(vote) => vec![*vote],
                ConsensusMsg::VotesBundle(votes) => votes.clone(),
                ConsensusMsg::ProposedBlock { vote, .. } => vec![*vote],
                ConsensusMsg::SyncedPeriod(_) => vec![],
            })
            .collect()
    }

    pub fn blocks(&self) -> Vec<SignedPbftBlock> {
        self.sent
            .lock()
            .expect("Locking failed")
            .iter()
            .filter_map(|msg| match msg {
                ConsensusMsg::ProposedBlock { block, .. } => Some(block.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sync_requests(&self) -> Vec<Period> {
        self.sync_requests.lock().expect("Locking failed").clone()
    }

    fn record(&self, msg: ConsensusMsg) {
        self.sent.lock().expect("Locking failed").push(msg);
    }
}

impl Network for RecordingNetwork {
    fn broadcast_vote(&self, vote: SignedVote) {
        self.record(ConsensusMsg::Vote(vote));
    }

    fn broadcast_votes(&self, votes: Vec<SignedVote>) {
        self.record(ConsensusMsg::VotesBundle(votes));
    }

    fn broadcast_block(&self, block: SignedPbftBlock, vote: SignedVote) {
        self.record(ConsensusMsg::ProposedBlock { block, vote });
    }

    fn request_sync(&self, from: Period) {
        self.sync_requests
            .lock()
            .expect("Locking failed")
            .push(from);
    }
}
