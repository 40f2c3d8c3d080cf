use bincode::{Decode, Encode};

use crate::block::{CertifiedBlock, SignedPbftBlock};
use crate::vote::SignedVote;

/// Everything validators exchange with each other
///
/// How these travel is up to the network layer.
#[derive(Debug, Encode, Decode, Clone)]
pub enum ConsensusMsg {
    Vote(SignedVote),
    /// Several votes at once, e.g. a rebroadcast of own votes
    VotesBundle(Vec<SignedVote>),
    /// A new proposal, together with the proposer's propose vote
    ProposedBlock {
        block: SignedPbftBlock,
        vote: SignedVote,
    },
    /// A block certified in a period the receiver is missing
    SyncedPeriod(CertifiedBlock),
}

impl ConsensusMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMsg::Vote(_) => "vote",
            ConsensusMsg::VotesBundle(_) => "votes_bundle",
            ConsensusMsg::ProposedBlock { .. } => "proposed_block",
            ConsensusMsg::SyncedPeriod(_) => "synced_period",
        }
    }
}
