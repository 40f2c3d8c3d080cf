use dagbft_consensus_core::block::{BlockHash, CertifiedBlock, SignedPbftBlock};
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::validator::ValidatorPubkey;
use dagbft_consensus_core::vote::SignedVote;
use dagbft_util_db::def_table;

use crate::storage::RoundState;

def_table! {
    /// Tracks consensus database/schema version
    db_version: () => u64
}

def_table! {
    /// Where the state machine was, so a restart resumes in the same round
    pbft_round_state: () => RoundState
}

def_table! {
    /// Certified blocks, with the cert votes that certified them
    ///
    /// Dense: periods `1..=chain_size`.
    pbft_chain: Period => CertifiedBlock
}

def_table! {
    /// Proposals received (or made) for periods not certified yet
    ///
    /// Cleanup: pruned once the period is certified.
    pbft_proposed_blocks: (Period, BlockHash) => SignedPbftBlock
}

def_table! {
    /// Every vote accepted into the ledger
    ///
    /// Keyed by block hash too, since in next steps a voter votes for both a
    /// value and null.
    ///
    /// Cleanup: only the current and the previous period are kept.
    pbft_votes: (Period, Round, Step, ValidatorPubkey, BlockHash) => SignedVote
}
