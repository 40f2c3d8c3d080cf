use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dagbft_consensus::config::PbftConfig;
use dagbft_consensus::manager::{PbftHandle, PbftManager, PbftStatus, StartError};
use dagbft_consensus::storage::DbStorage;
use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::stake::Stake;
use dagbft_consensus_core::vrf::SortitionError;
use dagbft_db::Database;
use dagbft_db::error::DbError;
use dagbft_util_error::fmt::FmtCompact as _;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tracing::{debug, info};

use crate::LOG_TARGET;
use crate::dag::SimDag;
use crate::final_chain::SimFinalChain;
use crate::network::{NodeIdx, SimNetwork};
use crate::slashing::CollectingSlashingReporter;
use crate::validators::SimValidators;

#[derive(Debug, Snafu)]
pub enum DevnetError {
    #[snafu(display("Failed to set up validators"))]
    Validators { source: SortitionError },
    #[snafu(display("Failed to open database of node {idx}"))]
    Database { idx: NodeIdx, source: DbError },
    #[snafu(display("Failed to start node {idx}"))]
    Start { idx: NodeIdx, source: StartError },
    #[snafu(display("Failed to spawn a thread"))]
    Spawn { source: std::io::Error },
    #[snafu(display("Node {idx} is not running"))]
    NotRunning { idx: NodeIdx },
    #[snafu(display("Node {idx} halted: {reason}"))]
    Halted { idx: NodeIdx, reason: String },
    #[snafu(display("Timed out waiting for chain size {target}"))]
    Timeout { target: u64 },
}

pub type DevnetResult<T> = Result<T, DevnetError>;

/// Keeps adding blocks to the DAG on its own thread
struct DagProducer {
    stop_tx: Option<crossbeam_channel::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DagProducer {
    fn spawn(dag: Arc<SimDag>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("sim-dag".into())
            .spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(stop_rx) -> _ => break,
                        default(interval) => {
                            dag.extend();
                        },
                    }
                }
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for DagProducer {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A set of validators running in one process
///
/// Nodes keep their database and execution state across
/// [`Devnet::stop_node`] / [`Devnet::start_node`], like a real node
/// restarting.
pub struct Devnet {
    config: PbftConfig,
    keys: Vec<ValidatorKeys>,
    validators: Arc<SimValidators>,
    dag: Arc<SimDag>,
    final_chains: Vec<Arc<SimFinalChain>>,
    dbs: Vec<Arc<Database>>,
    handles: Vec<Option<PbftHandle>>,
    slashing: Arc<CollectingSlashingReporter>,
    // Must be dropped before the network
    _dag_producer: Option<DagProducer>,
    network: SimNetwork,
}

#[bon::bon]
impl Devnet {
    /// Set up (but not start) `num_validators` nodes with equal stake
    #[builder]
    pub fn new(
        #[builder(default = 4)] num_validators: usize,
        #[builder(default)] config: PbftConfig,
        // Keep databases here instead of in memory
        data_dir: Option<PathBuf>,
        // Grow the DAG on its own at this pace
        dag_block_interval: Option<Duration>,
    ) -> DevnetResult<Self> {
        let keys: Vec<_> = (0..num_validators)
            .map(|_| ValidatorKeys::generate())
            .collect();
        let validators = Arc::new(
            SimValidators::new(&keys, Stake::new(1), config.sortition).context(ValidatorsSnafu)?,
        );

        let dag = Arc::new(SimDag::new());
        dag.add_block(&[]);

        let dbs = (0..num_validators)
            .map(|idx| {
                let db = match &data_dir {
                    Some(dir) => Database::open(dir.join(format!("node-{idx}.redb"))),
                    None => Database::new_in_memory(),
                };
                db.map(Arc::new).context(DatabaseSnafu { idx })
            })
            .collect::<DevnetResult<Vec<_>>>()?;

        let dag_producer = dag_block_interval
            .map(|interval| DagProducer::spawn(dag.clone(), interval))
            .transpose()
            .context(SpawnSnafu)?;

        Ok(Self {
            final_chains: (0..num_validators)
                .map(|_| Arc::new(SimFinalChain::new(dag.clone())))
                .collect(),
            handles: (0..num_validators).map(|_| None).collect(),
            config,
            keys,
            validators,
            dag,
            dbs,
            slashing: Arc::new(CollectingSlashingReporter::default()),
            _dag_producer: dag_producer,
            network: SimNetwork::new().context(SpawnSnafu)?,
        })
    }
}

impl Devnet {
    pub fn start_all(&mut self) -> DevnetResult<()> {
        for idx in 0..self.keys.len() {
            self.start_node(idx)?;
        }
        Ok(())
    }

    pub fn start_node(&mut self, idx: NodeIdx) -> DevnetResult<()> {
        if self.handles[idx].is_some() {
            return Ok(());
        }
        let storage = DbStorage::new(self.dbs[idx].clone()).context(DatabaseSnafu { idx })?;
        let handle = PbftManager::builder()
            .config(self.config.clone())
            .keys(self.keys[idx])
            .dpos(self.validators.clone())
            .final_chain(self.final_chains[idx].clone())
            .network(self.network.node(idx))
            .storage(Arc::new(storage))
            .slashing(self.slashing.clone())
            .build()
            .and_then(PbftManager::start)
            .context(StartSnafu { idx })?;

        debug!(target: LOG_TARGET, idx, chain_size = handle.chain_size(), "Node started");
        self.network.register(idx, handle.clone());
        self.handles[idx] = Some(handle);
        Ok(())
    }

    /// Stop node `idx`, returning the fatal error it halted on, if any
    pub fn stop_node(&mut self, idx: NodeIdx) -> DevnetResult<Option<String>> {
        let handle = self.handles[idx].take().context(NotRunningSnafu { idx })?;
        self.network.unregister(idx);
        let res = handle.stop();
        debug!(target: LOG_TARGET, idx, "Node stopped");
        Ok(res.err().map(|err| err.fmt_compact().to_string()))
    }

    pub fn stop_all(&mut self) {
        for idx in 0..self.keys.len() {
            let _ = self.stop_node(idx);
        }
    }

    pub fn handle(&self, idx: NodeIdx) -> Option<&PbftHandle> {
        self.handles.get(idx)?.as_ref()
    }

    pub fn running(&self) -> impl Iterator<Item = (NodeIdx, &PbftHandle)> {
        self.handles
            .iter()
            .enumerate()
            .filter_map(|(idx, h)| Some((idx, h.as_ref()?)))
    }

    pub fn num_validators(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[ValidatorKeys] {
        &self.keys
    }

    pub fn validators(&self) -> &Arc<SimValidators> {
        &self.validators
    }

    pub fn dag(&self) -> &Arc<SimDag> {
        &self.dag
    }

    pub fn final_chain(&self, idx: NodeIdx) -> &Arc<SimFinalChain> {
        &self.final_chains[idx]
    }

    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    pub fn slashing(&self) -> &Arc<CollectingSlashingReporter> {
        &self.slashing
    }

    /// Wait for every running node to reach `target` certified blocks
    pub async fn wait_for_chain_size(&self, target: u64, timeout: Duration) -> DevnetResult<()> {
        let nodes: Vec<_> = self.running().map(|(idx, _)| idx).collect();
        self.wait_for_nodes(&nodes, target, timeout).await
    }

    /// Wait for `nodes` to reach `target` certified blocks
    ///
    /// Fails early if any of them halts.
    pub async fn wait_for_nodes(
        &self,
        nodes: &[NodeIdx],
        target: u64,
        timeout: Duration,
    ) -> DevnetResult<()> {
        let mut receivers = vec![];
        for idx in nodes {
            let handle = self.handle(*idx).context(NotRunningSnafu { idx: *idx })?;
            receivers.push((*idx, handle.status()));
        }

        tokio::time::timeout(timeout, async move {
            for (idx, mut status) in receivers {
                let reached = status
                    .wait_for(|s| target <= s.chain_size || s.halted.is_some())
                    .await
                    .ok()
                    .context(NotRunningSnafu { idx })?
                    .clone();
                if let Some(reason) = reached.halted {
                    return HaltedSnafu { idx, reason }.fail();
                }
            }
            Ok::<_, DevnetError>(())
        })
        .await
        .ok()
        .context(TimeoutSnafu { target })??;

        info!(target: LOG_TARGET, target, "Chain size reached");
        Ok(())
    }

    pub fn statuses(&self) -> Vec<(NodeIdx, PbftStatus)> {
        self.running()
            .map(|(idx, h)| (idx, h.status().borrow().clone()))
            .collect()
    }
}

impl Drop for Devnet {
    fn drop(&mut self) {
        self.stop_all();
    }
}
