// SPDX-License-Identifier: MIT

//! DAG-anchored PBFT consensus
//!
//! [`manager::PbftManager`] drives the round/step state machine on its own
//! thread, certifying exactly one [`PbftBlock`] per period. Votes and blocks
//! coming from the network are validated at the boundary by a
//! [`manager::PbftHandle`], and land in the [`vote_manager::VoteManager`]
//! ledger and the [`proposed_blocks::ProposedBlocks`] registry, both of
//! which are shared with the manager thread.
//!
//! Everything outside of consensus proper (the DAG, execution, stake,
//! networking, persistence) is reached through the traits in
//! [`interfaces`].
//!
//! [`PbftBlock`]: dagbft_consensus_core::block::PbftBlock

pub mod config;
pub mod interfaces;
pub mod manager;
pub mod pbft_chain;
pub mod proposed_blocks;
pub mod storage;
mod tables;
#[cfg(test)]
mod test_utils;
pub mod vote_manager;

pub use dagbft_consensus_core as core;

const LOG_TARGET: &str = "dagbft::consensus";

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    Inserted,
    AlreadyPresent(T),
}

impl<T> InsertOutcome<T> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }

    pub fn map<O>(self, f: impl FnOnce(T) -> O) -> InsertOutcome<O> {
        match self {
            InsertOutcome::Inserted => InsertOutcome::Inserted,
            InsertOutcome::AlreadyPresent(t) => InsertOutcome::AlreadyPresent((f)(t)),
        }
    }
}
