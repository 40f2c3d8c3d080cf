use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::block::BlockHash;
use crate::period::{Period, Round, Step};
use crate::signed::{Hashable, Signable, Signed};
use crate::stake::Weight;
use crate::validator::ValidatorPubkey;
use crate::vrf::VrfSortitionCredential;

hash_type_define! {
    /// Hash of a [`Vote`]
    pub struct VoteHash;
}

#[derive(
    Debug, Encode, Decode, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum VoteType {
    Propose,
    Soft,
    Cert,
    Next,
}

impl VoteType {
    /// The only vote type valid in `step`
    pub fn from_step(step: Step) -> Self {
        match step.to_number() {
            0 | 1 => VoteType::Propose,
            2 => VoteType::Soft,
            3 => VoteType::Cert,
            _ => VoteType::Next,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VoteType::Propose => "propose",
            VoteType::Soft => "soft",
            VoteType::Cert => "cert",
            VoteType::Next => "next",
        })
    }
}

/// A validator's statement about a block in one consensus slot
#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub voter: ValidatorPubkey,
    /// [`BlockHash::NULL`] for next votes on "no value"
    pub block_hash: BlockHash,
    pub period: Period,
    pub round: Round,
    pub step: Step,
    pub vote_type: VoteType,
    pub credential: VrfSortitionCredential,
    pub weight: Weight,
}

impl Hashable for Vote {}
impl Signable for Vote {
    const TAG: [u8; 4] = *b"vote";
}

impl Vote {
    pub fn hash(&self) -> VoteHash {
        Hashable::hash(self).into()
    }

    /// Does the credential belong to the slot the vote claims
    pub fn credential_matches_slot(&self) -> bool {
        self.credential.period == self.period
            && self.credential.round == self.round
            && self.credential.step == self.step
    }
}

pub type SignedVote = Signed<Vote>;

impl SignedVote {
    pub fn vote_hash(&self) -> VoteHash {
        self.inner.hash()
    }
}

#[cfg(test)]
mod tests;
