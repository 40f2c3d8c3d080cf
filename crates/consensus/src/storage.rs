//! [`Storage`] over the consensus [`Database`]
use std::sync::Arc;

use bincode::{Decode, Encode};
use dagbft_consensus_core::block::{BlockHash, CertifiedBlock, SignedPbftBlock};
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::validator::ValidatorPubkey;
use dagbft_consensus_core::vote::SignedVote;
use dagbft_db::Database;
use dagbft_db::error::{DbResult, InconsistentSnafu};
use dagbft_util_db::open_tables;
use dagbft_util_db::redb_bincode::ReadableTable as _;
use snafu::ensure;
use tracing::debug;

use crate::LOG_TARGET;
use crate::interfaces::Storage;
use crate::tables::{db_version, pbft_chain, pbft_proposed_blocks, pbft_round_state, pbft_votes};

const DB_VERSION: u64 = 1;

/// Persisted part of the state machine
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RoundState {
    pub period: Period,
    pub round: Round,
    pub step: Step,
    /// Block we cert-voted in `round`, if any
    pub cert_voted_block: Option<BlockHash>,
    /// Already next-voted the soft-voted value in this round's finish steps
    pub next_voted_soft_value: bool,
    /// Already next-voted null in this round's finish steps
    pub next_voted_null: bool,
}

impl RoundState {
    pub fn new(period: Period, round: Round) -> Self {
        Self {
            period,
            round,
            step: Step::PROPOSE,
            cert_voted_block: None,
            next_voted_soft_value: false,
            next_voted_null: false,
        }
    }
}

fn vote_key(vote: &SignedVote) -> pbft_votes::Key {
    (
        vote.period,
        vote.round,
        vote.step,
        vote.voter,
        vote.block_hash,
    )
}

fn first_vote_key(period: Period) -> pbft_votes::Key {
    (
        period,
        Round::ZERO,
        Step::ZERO,
        ValidatorPubkey::ZERO,
        BlockHash::ZERO,
    )
}

pub struct DbStorage {
    db: Arc<Database>,
}

impl DbStorage {
    pub fn new(db: Arc<Database>) -> DbResult<Self> {
        db.write_with(|dbtx| {
            open_tables!(
                dbtx,
                db_version,
                pbft_round_state,
                pbft_chain,
                pbft_proposed_blocks,
                pbft_votes
            );

            let mut tbl = dbtx.open_table(&db_version::TABLE)?;
            let version = tbl.get(&())?.map(|v| v.value());
            match version {
                None => {
                    debug!(target: LOG_TARGET, version = DB_VERSION, "Initializing consensus database");
                    tbl.insert(&(), &DB_VERSION)?;
                }
                Some(version) => {
                    ensure!(
                        version == DB_VERSION,
                        InconsistentSnafu {
                            reason: "unsupported database version",
                        }
                    );
                }
            }
            Ok(())
        })?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }
}

impl Storage for DbStorage {
    fn persist_vote(&self, vote: &SignedVote) -> DbResult<()> {
        self.db.write_with(|dbtx| {
            let mut tbl = dbtx.open_table(&pbft_votes::TABLE)?;
            tbl.insert(&vote_key(vote), vote)?;
            Ok(())
        })
    }

    fn persist_block(&self, block: &SignedPbftBlock) -> DbResult<()> {
        self.db.write_with(|dbtx| {
            let mut tbl = dbtx.open_table(&pbft_proposed_blocks::TABLE)?;
            tbl.insert(&(block.period, block.block_hash()), block)?;
            Ok(())
        })
    }

    fn load_round_state(&self) -> DbResult<Option<RoundState>> {
        self.db.read_with(|dbtx| {
            let tbl = dbtx.open_table(&pbft_round_state::TABLE)?;
            Ok(tbl.get(&())?.map(|v| v.value()))
        })
    }

    fn save_round_state(&self, state: &RoundState) -> DbResult<()> {
        self.db.write_with(|dbtx| {
            let mut tbl = dbtx.open_table(&pbft_round_state::TABLE)?;
            tbl.insert(&(), state)?;
            Ok(())
        })
    }

    fn append_certified(&self, block: &CertifiedBlock) -> DbResult<()> {
        self.db.write_with(|dbtx| {
            let mut tbl = dbtx.open_table(&pbft_chain::TABLE)?;
            let period = block.period();
            if let Some((last, _)) = tbl.range(..)?.next_back().transpose()? {
                ensure!(
                    last.value().next() == Some(period),
                    InconsistentSnafu {
                        reason: "certified blocks must be appended in period order",
                    }
                );
            } else {
                ensure!(
                    period == Period::FIRST,
                    InconsistentSnafu {
                        reason: "chain must start with the first period",
                    }
                );
            }
            tbl.insert(&period, block)?;
            Ok(())
        })
    }

    fn load_certified(&self, period: Period) -> DbResult<Option<CertifiedBlock>> {
        self.db.read_with(|dbtx| {
            let tbl = dbtx.open_table(&pbft_chain::TABLE)?;
            Ok(tbl.get(&period)?.map(|v| v.value()))
        })
    }

    fn load_chain_hashes(&self) -> DbResult<Vec<BlockHash>> {
        self.db.read_with(|dbtx| {
            let tbl = dbtx.open_table(&pbft_chain::TABLE)?;
            let mut hashes = vec![];
            for kv in tbl.range(..)? {
                let (_, v) = kv?;
                hashes.push(v.value().block_hash());
            }
            Ok(hashes)
        })
    }

    fn load_proposed_blocks(&self) -> DbResult<Vec<SignedPbftBlock>> {
        self.db.read_with(|dbtx| {
            let tbl = dbtx.open_table(&pbft_proposed_blocks::TABLE)?;
            let mut blocks = vec![];
            for kv in tbl.range(..)? {
                let (_, v) = kv?;
                blocks.push(v.value());
            }
            Ok(blocks)
        })
    }

    fn load_votes(&self, from: Period) -> DbResult<Vec<SignedVote>> {
        self.db.read_with(|dbtx| {
            let tbl = dbtx.open_table(&pbft_votes::TABLE)?;
            let mut votes = vec![];
            for kv in tbl.range(first_vote_key(from)..)? {
                let (_, v) = kv?;
                votes.push(v.value());
            }
            Ok(votes)
        })
    }

    fn prune_below(&self, period: Period) -> DbResult<()> {
        self.db.write_with(|dbtx| {
            let mut tbl = dbtx.open_table(&pbft_proposed_blocks::TABLE)?;
            tbl.retain_in(
                &(Period::ZERO, BlockHash::ZERO)..&(period, BlockHash::ZERO),
                |_, _| false,
            )?;

            let mut tbl = dbtx.open_table(&pbft_votes::TABLE)?;
            tbl.retain_in(
                &first_vote_key(Period::ZERO)..&first_vote_key(period),
                |_, _| false,
            )?;
            Ok(())
        })?;
        debug!(target: LOG_TARGET, %period, "Pruned consensus storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
