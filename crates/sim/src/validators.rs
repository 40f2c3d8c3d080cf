use std::collections::BTreeMap;

use dagbft_consensus::interfaces::{DposResult, DposView};
use dagbft_consensus_core::block::BlockHash;
use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_consensus_core::sortition::{SortitionParams, compute_weight};
use dagbft_consensus_core::stake::Stake;
use dagbft_consensus_core::validator::ValidatorPubkey;
use dagbft_consensus_core::vote::SignedVote;
use dagbft_consensus_core::vrf::{SortitionResult, VrfPubkey};

/// Validator set that never changes
#[derive(Debug, Clone)]
pub struct SimValidators {
    validators: BTreeMap<ValidatorPubkey, (VrfPubkey, Stake)>,
    params: SortitionParams,
}

impl SimValidators {
    pub fn new(
        keys: &[ValidatorKeys],
        stake: Stake,
        params: SortitionParams,
    ) -> SortitionResult<Self> {
        let validators = keys
            .iter()
            .map(|k| Ok((k.pubkey(), (k.vrf_pubkey()?, stake))))
            .collect::<SortitionResult<_>>()?;
        Ok(Self { validators, params })
    }

    pub fn total_stake(&self) -> Stake {
        self.validators.values().map(|(_, s)| *s).sum()
    }

    /// Vote of `keys` in the slot, with whatever weight sortition gives it
    ///
    /// For injecting votes of validators not running a manager.
    pub fn signed_vote(
        &self,
        keys: &ValidatorKeys,
        block_hash: BlockHash,
        period: Period,
        round: Round,
        step: Step,
    ) -> SortitionResult<SignedVote> {
        let credential = keys.credential(period, round, step)?;
        let stake = self
            .validators
            .get(&keys.pubkey())
            .map(|(_, s)| *s)
            .unwrap_or(Stake::ZERO);
        let weight = compute_weight(&credential, stake, self.total_stake(), &self.params);
        Ok(keys.sign_vote_with_credential(block_hash, credential, weight))
    }
}

impl DposView for SimValidators {
    fn total_eligible_stake(&self, _period: Period) -> DposResult<Stake> {
        Ok(self.total_stake())
    }

    fn stake_of(&self, validator: ValidatorPubkey, _period: Period) -> DposResult<Stake> {
        Ok(self
            .validators
            .get(&validator)
            .map(|(_, s)| *s)
            .unwrap_or(Stake::ZERO))
    }

    fn vrf_pubkey_of(
        &self,
        validator: ValidatorPubkey,
        _period: Period,
    ) -> DposResult<Option<VrfPubkey>> {
        Ok(self.validators.get(&validator).map(|(k, _)| *k))
    }
}
