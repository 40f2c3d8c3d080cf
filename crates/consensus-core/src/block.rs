use bincode::{Decode, Encode};

use crate::bincode::CONSENSUS_BINCODE_CONFIG;
use crate::period::Period;
use crate::signed::{Hashable, Signable, Signed};
use crate::timestamp::Timestamp;
use crate::validator::ValidatorPubkey;
use crate::vote::{SignedVote, VoteHash};

hash_type_define! {
    /// Hash of a [`PbftBlock`]
    ///
    /// [`BlockHash::NULL`] is what next-votes on "no value" vote for.
    pub struct BlockHash;
}

hash_type_define! {
    /// Hash of a DAG block
    pub struct DagBlockHash;
}

hash_type_define! {
    /// Root of the account state after executing a period
    pub struct StateRoot;
}

hash_type_define! {
    /// Commits to the order DAG blocks get executed in
    pub struct OrderHash;
}

/// Hash committing to a DAG order
///
/// An empty order (a block with no anchor) is [`OrderHash::NULL`].
pub fn calculate_order_hash(order: &[DagBlockHash]) -> OrderHash {
    if order.is_empty() {
        return OrderHash::NULL;
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dagbft-order");
    bincode::encode_into_std_write(order, &mut hasher, CONSENSUS_BINCODE_CONFIG)
        .expect("Can't fail");
    hasher.finalize().into()
}

/// Versioning and optional commitments carried by a block
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct ExtraData {
    pub version: String,
    pub pillar_block_hash: Option<BlockHash>,
}

#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct PbftBlock {
    pub period: Period,
    /// Hash of the block certified in the previous period
    pub prev_block_hash: BlockHash,
    /// DAG block pivoting this period's order, [`DagBlockHash::NULL`] for an
    /// empty block
    pub anchor_hash: DagBlockHash,
    pub order_hash: OrderHash,
    /// State root after executing the previous period
    pub prev_state_root: StateRoot,
    pub beneficiary: ValidatorPubkey,
    pub timestamp: Timestamp,
    /// Cert votes that certified the block of the previous period
    pub reward_votes: Vec<VoteHash>,
    pub extra_data: Option<ExtraData>,
}

impl Hashable for PbftBlock {}
impl Signable for PbftBlock {
    const TAG: [u8; 4] = *b"pbft";
}

#[bon::bon]
impl PbftBlock {
    #[builder]
    pub fn new(
        period: Period,
        prev_block_hash: BlockHash,
        anchor_hash: DagBlockHash,
        order_hash: OrderHash,
        prev_state_root: StateRoot,
        beneficiary: ValidatorPubkey,
        #[builder(default = Timestamp::now())] timestamp: Timestamp,
        #[builder(default)] reward_votes: Vec<VoteHash>,
        extra_data: Option<ExtraData>,
    ) -> Self {
        Self {
            period,
            prev_block_hash,
            anchor_hash,
            order_hash,
            prev_state_root,
            beneficiary,
            timestamp,
            reward_votes,
            extra_data,
        }
    }
}

impl PbftBlock {
    pub fn hash(&self) -> BlockHash {
        Hashable::hash(self).into()
    }

    pub fn is_empty(&self) -> bool {
        self.anchor_hash.is_null()
    }
}

pub type SignedPbftBlock = Signed<PbftBlock>;

impl SignedPbftBlock {
    /// Identity of the block; the signature is not part of it
    pub fn block_hash(&self) -> BlockHash {
        self.inner.hash()
    }
}

/// A block together with the cert votes proving its certification
///
/// What the chain stores, and what syncing nodes receive.
#[derive(Debug, Encode, Decode, Clone)]
pub struct CertifiedBlock {
    pub block: SignedPbftBlock,
    pub cert_votes: Vec<SignedVote>,
    /// State root after executing this block's order
    pub state_root: StateRoot,
    pub order: Vec<DagBlockHash>,
}

impl CertifiedBlock {
    pub fn block_hash(&self) -> BlockHash {
        self.block.block_hash()
    }

    pub fn period(&self) -> Period {
        self.block.period
    }
}

#[cfg(test)]
mod tests;
