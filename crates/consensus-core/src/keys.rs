use bincode::{Decode, Encode};

use crate::block::{BlockHash, PbftBlock, SignedPbftBlock};
use crate::period::{Period, Round, Step};
use crate::signed::Signed;
use crate::stake::Weight;
use crate::validator::{ValidatorPubkey, ValidatorSeckey};
use crate::vote::{SignedVote, Vote, VoteType};
use crate::vrf::{
    SortitionResult, VrfPubkey, VrfSeckey, VrfSortitionCredential, compute_credential,
};

/// Secrets of a validator: its identity key and the VRF key for sortition
#[derive(Encode, Decode, Clone, Copy)]
pub struct ValidatorKeys {
    pub seckey: ValidatorSeckey,
    pub vrf_seckey: VrfSeckey,
}

impl ValidatorKeys {
    pub fn new(seckey: ValidatorSeckey, vrf_seckey: VrfSeckey) -> Self {
        Self { seckey, vrf_seckey }
    }

    pub fn generate() -> Self {
        Self {
            seckey: ValidatorSeckey::generate(),
            vrf_seckey: VrfSeckey::generate(),
        }
    }

    pub fn pubkey(&self) -> ValidatorPubkey {
        self.seckey.pubkey()
    }

    pub fn vrf_pubkey(&self) -> SortitionResult<VrfPubkey> {
        self.vrf_seckey.pubkey()
    }

    pub fn credential(
        &self,
        period: Period,
        round: Round,
        step: Step,
    ) -> SortitionResult<VrfSortitionCredential> {
        compute_credential(self.vrf_seckey, period, round, step)
    }

    /// Sign a vote for `block_hash` with a freshly computed credential
    ///
    /// The caller is responsible for `weight` being what the credential
    /// entitles to.
    pub fn sign_vote(
        &self,
        block_hash: BlockHash,
        period: Period,
        round: Round,
        step: Step,
        weight: Weight,
    ) -> SortitionResult<SignedVote> {
        let credential = self.credential(period, round, step)?;
        Ok(self.sign_vote_with_credential(block_hash, credential, weight))
    }

    pub fn sign_vote_with_credential(
        &self,
        block_hash: BlockHash,
        credential: VrfSortitionCredential,
        weight: Weight,
    ) -> SignedVote {
        Signed::new_sign(
            Vote {
                voter: self.pubkey(),
                block_hash,
                period: credential.period,
                round: credential.round,
                step: credential.step,
                vote_type: VoteType::from_step(credential.step),
                credential,
                weight,
            },
            self.seckey,
        )
    }

    pub fn sign_block(&self, block: PbftBlock) -> SignedPbftBlock {
        Signed::new_sign(block, self.seckey)
    }
}
