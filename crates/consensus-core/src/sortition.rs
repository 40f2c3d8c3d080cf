//! Stake-weighted sortition
//!
//! Every validator draws its own voting weight for a slot from a binomial
//! distribution `B(own_stake, threshold / total_stake)`, seeded by its VRF
//! output. The expected total weight across all validators equals
//! `threshold`, no matter how many validators there are, and nobody can
//! pick their draw.
use bincode::{Decode, Encode};
use dagbft_util_array_type::{
    array_type_define, array_type_impl_debug_as_display, array_type_impl_hex_str,
};
use serde::{Deserialize, Serialize};

use crate::bincode::CONSENSUS_BINCODE_CONFIG;
use crate::period::Step;
use crate::stake::{Stake, Weight};
use crate::validator::ValidatorPubkey;
use crate::vrf::{VrfOutput, VrfSortitionCredential};

/// Deployment-specific sortition targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct SortitionParams {
    /// Expected total weight of voters in each voting step
    pub committee_size: u64,
    /// Expected total weight of proposers in the propose step
    pub number_of_proposers: u64,
}

impl Default for SortitionParams {
    fn default() -> Self {
        Self {
            committee_size: 1000,
            number_of_proposers: 20,
        }
    }
}

impl SortitionParams {
    /// Expected total weight of the sortition in `step`
    pub fn threshold(&self, step: Step, total_stake: Stake) -> u64 {
        let target = if step == Step::PROPOSE {
            self.number_of_proposers
        } else {
            self.committee_size
        };
        target.min(total_stake.to_number())
    }

    fn voting_threshold(&self, total_stake: Stake) -> u64 {
        self.committee_size.min(total_stake.to_number())
    }

    /// Weight a quorum certificate needs
    pub fn two_t_plus_one(&self, total_stake: Stake) -> Weight {
        Weight::new(self.voting_threshold(total_stake) * 2 / 3 + 1)
    }

    /// Weight guaranteeing at least one honest voter
    pub fn t_plus_one(&self, total_stake: Stake) -> Weight {
        Weight::new(self.voting_threshold(total_stake) / 3 + 1)
    }
}

/// Voting weight `credential` entitles a validator with `own_stake` to
///
/// Zero means not eligible in the credential's slot.
pub fn compute_weight(
    credential: &VrfSortitionCredential,
    own_stake: Stake,
    total_stake: Stake,
    params: &SortitionParams,
) -> Weight {
    if own_stake.is_zero() || total_stake.is_zero() {
        return Weight::ZERO;
    }

    let threshold = params.threshold(credential.step, total_stake);
    if threshold == 0 {
        return Weight::ZERO;
    }
    let p = threshold as f64 / total_stake.to_number() as f64;
    if 1.0 <= p {
        return Weight::new(own_stake.to_number());
    }

    Weight::new(binomial_inverse_cdf(
        own_stake.to_number(),
        p,
        credential.output.to_unit_fraction(),
    ))
}

/// Smallest `k` such that `P(X <= k) > u` for `X ~ B(n, p)`
///
/// Probabilities are stepped through in log space, since with big stakes
/// `(1 - p)^n` underflows long before the interesting part of the
/// distribution.
fn binomial_inverse_cdf(n: u64, p: f64, u: f64) -> u64 {
    debug_assert!(0.0 < p && p < 1.0);

    let ln_p = p.ln();
    let ln_q = (-p).ln_1p();
    let mean = n as f64 * p;

    let mut k = 0u64;
    let mut ln_pmf = n as f64 * ln_q;
    let mut cdf = ln_pmf.exp();

    while cdf <= u && k < n {
        ln_pmf += ((n - k) as f64).ln() - ((k + 1) as f64).ln() + ln_p - ln_q;
        k += 1;

        let pmf = ln_pmf.exp();
        // Past the mean with nothing left to add: rounding kept the cdf
        // from ever reaching `u`.
        if pmf == 0.0 && mean < k as f64 {
            break;
        }
        cdf += pmf;
    }

    k
}

array_type_define! {
    /// Ordering key for picking the round's leader; lowest wins
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct SortitionPriority[32];
}
array_type_impl_hex_str!(SortitionPriority);
array_type_impl_debug_as_display!(SortitionPriority);

/// Priority of a proposal, given its proposer's sortition outcome
///
/// Each unit of weight is a separate lottery ticket, and the best one counts,
/// so more weight means proportionally better odds. `None` for zero weight.
pub fn proposal_priority(
    output: VrfOutput,
    voter: ValidatorPubkey,
    weight: Weight,
) -> Option<SortitionPriority> {
    (1..=weight.to_number())
        .map(|i| {
            let mut hasher = blake3::Hasher::new();
            bincode::encode_into_std_write((output, voter, i), &mut hasher, CONSENSUS_BINCODE_CONFIG)
                .expect("Can't fail");
            SortitionPriority::from_bytes(*hasher.finalize().as_bytes())
        })
        .min()
}
