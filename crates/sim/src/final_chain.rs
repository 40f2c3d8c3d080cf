use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use dagbft_consensus::interfaces::{DagOrderError, ExecutionError, FinalChain, Frontier};
use dagbft_consensus_core::bincode::CONSENSUS_BINCODE_CONFIG;
use dagbft_consensus_core::block::{DagBlockHash, StateRoot};
use dagbft_consensus_core::period::Period;
use tracing::debug;

use crate::LOG_TARGET;
use crate::dag::SimDag;

#[derive(Debug)]
struct ExecState {
    /// DAG blocks executed so far, plus anything marked stale
    ordered: HashSet<DagBlockHash>,
    roots: BTreeMap<Period, StateRoot>,
    fail_execution_at: Option<Period>,
}

/// One node's execution layer over the shared [`SimDag`]
///
/// The state root of a period commits to the previous root and everything
/// executed in it, so nodes executing different orders diverge visibly.
#[derive(Debug)]
pub struct SimFinalChain {
    dag: Arc<SimDag>,
    state: Mutex<ExecState>,
}

impl SimFinalChain {
    pub fn genesis_root() -> StateRoot {
        blake3::hash(b"dagbft-sim-genesis").into()
    }

    pub fn new(dag: Arc<SimDag>) -> Self {
        Self {
            dag,
            state: Mutex::new(ExecState {
                ordered: HashSet::new(),
                roots: BTreeMap::from([(Period::ZERO, Self::genesis_root())]),
                fail_execution_at: None,
            }),
        }
    }

    /// Make executing `period` fail
    pub fn fail_execution_at(&self, period: Period) {
        self.state.lock().expect("Locking failed").fail_execution_at = Some(period);
    }

    /// Treat `anchor` as ordered by an earlier period
    pub fn mark_anchor_stale(&self, anchor: DagBlockHash) {
        self.state
            .lock()
            .expect("Locking failed")
            .ordered
            .insert(anchor);
    }

    pub fn is_ordered(&self, hash: DagBlockHash) -> bool {
        self.state
            .lock()
            .expect("Locking failed")
            .ordered
            .contains(&hash)
    }

    /// Last executed period
    pub fn executed_period(&self) -> Period {
        self.state
            .lock()
            .expect("Locking failed")
            .roots
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Period::ZERO)
    }
}

impl FinalChain for SimFinalChain {
    fn current_frontier(&self) -> Frontier {
        Frontier {
            pivot: self.dag.latest(),
            tips: self.dag.tips(),
        }
    }

    fn dag_order(
        &self,
        anchor: DagBlockHash,
        _period: Period,
    ) -> Result<Vec<DagBlockHash>, DagOrderError> {
        let state = self.state.lock().expect("Locking failed");
        if state.ordered.contains(&anchor) {
            return Err(DagOrderError::AlreadyOrdered { anchor });
        }
        self.dag
            .order_from(anchor, &state.ordered)
            .ok_or(DagOrderError::UnknownAnchor { anchor })
    }

    fn state_root(&self, period: Period) -> Option<StateRoot> {
        self.state
            .lock()
            .expect("Locking failed")
            .roots
            .get(&period)
            .copied()
    }

    fn execute_period(
        &self,
        period: Period,
        anchor: DagBlockHash,
        order: &[DagBlockHash],
    ) -> Result<StateRoot, ExecutionError> {
        let mut state = self.state.lock().expect("Locking failed");
        if state.fail_execution_at == Some(period) {
            return Err(ExecutionError {
                period,
                reason: "injected failure".into(),
            });
        }
        let prev_root = period
            .prev()
            .and_then(|prev| state.roots.get(&prev).copied())
            .ok_or_else(|| ExecutionError {
                period,
                reason: "previous period not executed".into(),
            })?;
        if state.roots.contains_key(&period) {
            return Err(ExecutionError {
                period,
                reason: "already executed".into(),
            });
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"dagbft-sim-exec");
        bincode::encode_into_std_write(
            (prev_root, period, anchor, order),
            &mut hasher,
            CONSENSUS_BINCODE_CONFIG,
        )
        .expect("Can't fail");
        let root = StateRoot::from(hasher.finalize());

        state.ordered.extend(order.iter().copied());
        state.roots.insert(period, root);
        debug!(target: LOG_TARGET, %period, %root, num = order.len(), "Executed period");
        Ok(root)
    }
}

#[cfg(test)]
mod tests;
