use std::collections::HashSet;
use std::sync::RwLock;

use dagbft_consensus_core::block::{BlockHash, CertifiedBlock};
use dagbft_consensus_core::period::Period;
use dagbft_db::error::{DbError, DbResult, InconsistentSnafu};
use snafu::{OptionExt as _, Snafu, ensure};
use tracing::info;

use crate::LOG_TARGET;
use crate::interfaces::StorageArc;

#[derive(Debug, Snafu)]
pub enum ChainError {
    #[snafu(display("Expected a block of period {expected}, got {got}"))]
    PeriodMismatch { expected: Period, got: Period },
    #[snafu(display("Block builds on {got}, but the chain head is {expected}"))]
    ParentMismatch { expected: BlockHash, got: BlockHash },
    #[snafu(transparent)]
    Db { source: DbError },
}

pub type ChainResult<T> = Result<T, ChainError>;

#[derive(Default)]
struct ChainInner {
    hashes: Vec<BlockHash>,
    index: HashSet<BlockHash>,
    head: Option<CertifiedBlock>,
}

/// The sequence of certified blocks, one per period
///
/// Append-only, and the only thing writing certified blocks to storage.
pub struct PbftChain {
    storage: StorageArc,
    inner: RwLock<ChainInner>,
}

impl PbftChain {
    pub fn load(storage: StorageArc) -> DbResult<Self> {
        let hashes = storage.load_chain_hashes()?;
        let head = match u64::try_from(hashes.len()).expect("Can't fail") {
            0 => None,
            len => Some(
                storage
                    .load_certified(Period::new(len))?
                    .context(InconsistentSnafu {
                        reason: "chain head missing",
                    })?,
            ),
        };
        let index = hashes.iter().copied().collect();

        Ok(Self {
            storage,
            inner: RwLock::new(ChainInner {
                hashes,
                index,
                head,
            }),
        })
    }

    /// Number of certified blocks
    pub fn size(&self) -> u64 {
        self.inner.read().expect("Locking failed").hashes.len() as u64
    }

    /// The period not certified yet
    pub fn current_period(&self) -> Period {
        Period::new(self.size() + 1)
    }

    /// Hash of the chain head, [`BlockHash::NULL`] for an empty chain
    pub fn last_block_hash(&self) -> BlockHash {
        self.inner
            .read()
            .expect("Locking failed")
            .hashes
            .last()
            .copied()
            .unwrap_or(BlockHash::NULL)
    }

    pub fn head(&self) -> Option<CertifiedBlock> {
        self.inner.read().expect("Locking failed").head.clone()
    }

    pub fn contains(&self, hash: BlockHash) -> bool {
        self.inner
            .read()
            .expect("Locking failed")
            .index
            .contains(&hash)
    }

    pub fn get(&self, period: Period) -> DbResult<Option<CertifiedBlock>> {
        if self.current_period() <= period {
            return Ok(None);
        }
        self.storage.load_certified(period)
    }

    /// Append the block certified in the current period
    pub fn append(&self, block: CertifiedBlock) -> ChainResult<()> {
        let mut inner = self.inner.write().expect("Locking failed");

        let expected = Period::new(inner.hashes.len() as u64 + 1);
        ensure!(
            block.period() == expected,
            PeriodMismatchSnafu {
                expected,
                got: block.period(),
            }
        );
        let last = inner.hashes.last().copied().unwrap_or(BlockHash::NULL);
        ensure!(
            block.block.prev_block_hash == last,
            ParentMismatchSnafu {
                expected: last,
                got: block.block.prev_block_hash,
            }
        );

        self.storage.append_certified(&block)?;

        let hash = block.block_hash();
        info!(
            target: LOG_TARGET,
            period = %expected,
            block_hash = %hash,
            anchor = %block.block.anchor_hash,
            "Certified block appended"
        );
        inner.hashes.push(hash);
        inner.index.insert(hash);
        inner.head = Some(block);
        Ok(())
    }
}
