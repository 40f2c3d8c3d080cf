use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::RwLock;

use dagbft_consensus_core::bincode::CONSENSUS_BINCODE_CONFIG;
use dagbft_consensus_core::block::DagBlockHash;
use tracing::trace;

use crate::LOG_TARGET;

#[derive(Debug, Clone)]
struct DagBlock {
    parents: Vec<DagBlockHash>,
}

#[derive(Debug, Default)]
struct DagInner {
    blocks: BTreeMap<DagBlockHash, DagBlock>,
    tips: BTreeSet<DagBlockHash>,
    latest: Option<DagBlockHash>,
    next_seq: u64,
}

/// Append-only DAG, shared by every node of a simulation
///
/// Blocks carry no payload; a block is its sequence number and parents.
#[derive(Debug, Default)]
pub struct SimDag {
    inner: RwLock<DagInner>,
}

impl SimDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block with the given `parents`, all of which must be known
    pub fn add_block(&self, parents: &[DagBlockHash]) -> DagBlockHash {
        let mut inner = self.inner.write().expect("Locking failed");
        debug_assert!(parents.iter().all(|p| inner.blocks.contains_key(p)));

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"dagbft-sim-dag");
        bincode::encode_into_std_write(
            (inner.next_seq, parents),
            &mut hasher,
            CONSENSUS_BINCODE_CONFIG,
        )
        .expect("Can't fail");
        let hash = DagBlockHash::from(hasher.finalize());
        inner.next_seq += 1;

        for parent in parents {
            inner.tips.remove(parent);
        }
        inner.tips.insert(hash);
        inner.blocks.insert(
            hash,
            DagBlock {
                parents: parents.to_vec(),
            },
        );
        inner.latest = Some(hash);
        trace!(target: LOG_TARGET, %hash, num_parents = parents.len(), "New DAG block");
        hash
    }

    /// Add a block referencing all current tips
    pub fn extend(&self) -> DagBlockHash {
        let tips = self.tips();
        self.add_block(&tips)
    }

    pub fn contains(&self, hash: DagBlockHash) -> bool {
        self.inner
            .read()
            .expect("Locking failed")
            .blocks
            .contains_key(&hash)
    }

    pub fn tips(&self) -> Vec<DagBlockHash> {
        self.inner
            .read()
            .expect("Locking failed")
            .tips
            .iter()
            .copied()
            .collect()
    }

    /// Most recently added block
    pub fn latest(&self) -> Option<DagBlockHash> {
        self.inner.read().expect("Locking failed").latest
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("Locking failed").blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Post-order of everything reachable from `anchor` and not in `exclude`
    ///
    /// Parents are visited in hash order, so every node computes the same
    /// order. `None` if `anchor` is unknown.
    pub fn order_from(
        &self,
        anchor: DagBlockHash,
        exclude: &HashSet<DagBlockHash>,
    ) -> Option<Vec<DagBlockHash>> {
        let inner = self.inner.read().expect("Locking failed");
        if !inner.blocks.contains_key(&anchor) {
            return None;
        }

        let mut order = vec![];
        let mut visited = HashSet::new();
        // (block, parents already pushed)
        let mut stack = vec![(anchor, false)];
        while let Some((hash, expanded)) = stack.pop() {
            if expanded {
                order.push(hash);
                continue;
            }
            if exclude.contains(&hash) || !visited.insert(hash) {
                continue;
            }
            stack.push((hash, true));
            let mut parents = inner.blocks[&hash].parents.clone();
            parents.sort();
            // Reversed, so the lowest hash gets popped (and ordered) first
            for parent in parents.into_iter().rev() {
                if !exclude.contains(&parent) && !visited.contains(&parent) {
                    stack.push((parent, false));
                }
            }
        }
        Some(order)
    }
}

#[cfg(test)]
mod tests;
