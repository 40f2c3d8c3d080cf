use std::collections::BTreeMap;
use std::sync::Mutex;

use dagbft_consensus_core::block::{BlockHash, SignedPbftBlock};
use dagbft_consensus_core::period::Period;

use crate::InsertOutcome;

/// What we know about a proposed block being valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockValidity {
    Unchecked,
    Valid,
    Invalid,
}

/// Blocks proposed for periods not certified yet
#[derive(Default)]
pub struct ProposedBlocks {
    inner: Mutex<BTreeMap<Period, BTreeMap<BlockHash, (SignedPbftBlock, BlockValidity)>>>,
}

impl ProposedBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, block: SignedPbftBlock) -> InsertOutcome<BlockValidity> {
        let hash = block.block_hash();
        let mut inner = self.inner.lock().expect("Locking failed");
        let by_hash = inner.entry(block.period).or_default();
        if let Some((_, validity)) = by_hash.get(&hash) {
            return InsertOutcome::AlreadyPresent(*validity);
        }
        by_hash.insert(hash, (block, BlockValidity::Unchecked));
        InsertOutcome::Inserted
    }

    pub fn get(&self, period: Period, hash: BlockHash) -> Option<(SignedPbftBlock, BlockValidity)> {
        self.inner
            .lock()
            .expect("Locking failed")
            .get(&period)
            .and_then(|b| b.get(&hash))
            .cloned()
    }

    pub fn contains(&self, period: Period, hash: BlockHash) -> bool {
        self.inner
            .lock()
            .expect("Locking failed")
            .get(&period)
            .is_some_and(|b| b.contains_key(&hash))
    }

    fn set_validity(&self, period: Period, hash: BlockHash, validity: BlockValidity) {
        if let Some((_, v)) = self
            .inner
            .lock()
            .expect("Locking failed")
            .get_mut(&period)
            .and_then(|b| b.get_mut(&hash))
        {
            *v = validity;
        }
    }

    pub fn mark_valid(&self, period: Period, hash: BlockHash) {
        self.set_validity(period, hash, BlockValidity::Valid);
    }

    pub fn mark_invalid(&self, period: Period, hash: BlockHash) {
        self.set_validity(period, hash, BlockValidity::Invalid);
    }

    /// Drop blocks of periods before `period`
    pub fn cleanup(&self, period: Period) {
        let mut inner = self.inner.lock().expect("Locking failed");
        *inner = inner.split_off(&period);
    }
}

#[cfg(test)]
mod tests;
