use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use dagbft_consensus_core::block::{
    BlockHash, CertifiedBlock, DagBlockHash, OrderHash, PbftBlock, SignedPbftBlock, StateRoot,
};
use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::sortition::{SortitionParams, compute_weight};
use dagbft_consensus_core::stake::Stake;
use dagbft_consensus_core::validator::ValidatorPubkey;
use dagbft_consensus_core::vote::SignedVote;
use dagbft_consensus_core::vrf::VrfPubkey;

use crate::interfaces::{
    DposError, DposResult, DposView, EquivocationEvidence, SlashingReporter,
};

/// Fixed validator set, every period
pub(crate) struct StaticDpos {
    pub keys: Vec<ValidatorKeys>,
    validators: BTreeMap<ValidatorPubkey, (VrfPubkey, Stake)>,
    pub params: SortitionParams,
    /// Snapshots before this period are gone
    pub available_from: Period,
}

impl StaticDpos {
    pub fn new(stakes: &[u64]) -> Self {
        let keys: Vec<_> = stakes.iter().map(|_| ValidatorKeys::generate()).collect();
        let validators = keys
            .iter()
            .zip(stakes)
            .map(|(k, s)| {
                (
                    k.pubkey(),
                    (k.vrf_pubkey().expect("valid key"), Stake::new(*s)),
                )
            })
            .collect();
        Self {
            keys,
            validators,
            params: SortitionParams::default(),
            available_from: Period::ZERO,
        }
    }

    pub fn total(&self) -> Stake {
        self.validators.values().map(|(_, s)| *s).sum()
    }

    /// Vote of validator `idx` carrying the weight its credential gives
    pub fn vote(
        &self,
        idx: usize,
        block_hash: BlockHash,
        period: Period,
        round: Round,
        step: Step,
    ) -> SignedVote {
        let keys = &self.keys[idx];
        let credential = keys.credential(period, round, step).expect("valid key");
        let stake = self.validators[&keys.pubkey()].1;
        let weight = compute_weight(&credential, stake, self.total(), &self.params);
        keys.sign_vote_with_credential(block_hash, credential, weight)
    }

    fn check(&self, period: Period) -> DposResult<()> {
        if period < self.available_from {
            return Err(DposError::SnapshotUnavailable { period });
        }
        Ok(())
    }
}

impl DposView for StaticDpos {
    fn total_eligible_stake(&self, period: Period) -> DposResult<Stake> {
        self.check(period)?;
        Ok(self.total())
    }

    fn stake_of(&self, validator: ValidatorPubkey, period: Period) -> DposResult<Stake> {
        self.check(period)?;
        Ok(self
            .validators
            .get(&validator)
            .map(|(_, s)| *s)
            .unwrap_or(Stake::ZERO))
    }

    fn vrf_pubkey_of(
        &self,
        validator: ValidatorPubkey,
        period: Period,
    ) -> DposResult<Option<VrfPubkey>> {
        self.check(period)?;
        Ok(self.validators.get(&validator).map(|(k, _)| *k))
    }
}

#[derive(Default)]
pub(crate) struct CollectingSlashing {
    pub evidence: Mutex<Vec<EquivocationEvidence>>,
}

impl SlashingReporter for CollectingSlashing {
    fn report_equivocation(&self, evidence: EquivocationEvidence) {
        self.evidence.lock().expect("Locking failed").push(evidence);
    }
}

pub(crate) fn block_hash(n: u8) -> BlockHash {
    BlockHash::from_bytes([n; 32])
}

pub(crate) fn arc_pair(dpos: StaticDpos) -> (Arc<StaticDpos>, Arc<CollectingSlashing>) {
    (Arc::new(dpos), Arc::new(CollectingSlashing::default()))
}

/// An empty (null anchor) block of `period` building on `prev`
pub(crate) fn signed_block(keys: &ValidatorKeys, period: Period, prev: BlockHash) -> SignedPbftBlock {
    keys.sign_block(
        PbftBlock::builder()
            .period(period)
            .prev_block_hash(prev)
            .anchor_hash(DagBlockHash::NULL)
            .order_hash(OrderHash::NULL)
            .prev_state_root(StateRoot::NULL)
            .beneficiary(keys.pubkey())
            .build(),
    )
}

pub(crate) fn certified_block(keys: &ValidatorKeys, period: Period, prev: BlockHash) -> CertifiedBlock {
    CertifiedBlock {
        block: signed_block(keys, period, prev),
        cert_votes: vec![],
        state_root: StateRoot::from_bytes([period.to_number() as u8; 32]),
        order: vec![],
    }
}
