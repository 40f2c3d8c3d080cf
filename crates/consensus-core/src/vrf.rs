//! Verifiable random function backing the sortition
//!
//! Schnorrkel (sr25519) VRF. The input is the consensus-encoded
//! `(period, round, step)` triple, so a credential is bound to exactly one
//! slot and anyone with the voter's [`VrfPubkey`] can re-check it.
use bincode::{Decode, Encode};
use dagbft_util_array_type::{
    array_type_define, array_type_impl_bytes_conv, array_type_impl_debug_as_display,
    array_type_impl_hex_str, array_type_impl_rand, array_type_impl_serde,
    array_type_impl_zero_default,
};
use schnorrkel::vrf::{VRFPreOut, VRFProof};
use schnorrkel::{ExpansionMode, MiniSecretKey, PublicKey, signing_context};
use snafu::{OptionExt as _, Snafu};

use crate::bincode::CONSENSUS_BINCODE_CONFIG;
use crate::period::{Period, Round, Step};

const VRF_SIGNING_CONTEXT: &[u8] = b"dagbft-sortition";
const VRF_OUTPUT_CONTEXT: &[u8] = b"dagbft-sortition-output";

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct VrfPubkey[32];
}
array_type_impl_zero_default!(VrfPubkey);
array_type_impl_hex_str!(VrfPubkey);
array_type_impl_serde!(VrfPubkey);
array_type_impl_debug_as_display!(VrfPubkey);
array_type_impl_bytes_conv!(VrfPubkey);

array_type_define! {
    /// Schnorrkel "mini" secret key
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct VrfSeckey[32];
}
array_type_impl_zero_default!(VrfSeckey);
array_type_impl_hex_str!(VrfSeckey);
array_type_impl_bytes_conv!(VrfSeckey);
array_type_impl_rand!(VrfSeckey);

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct VrfProof[64];
}
array_type_impl_zero_default!(VrfProof);
array_type_impl_hex_str!(VrfProof);
array_type_impl_debug_as_display!(VrfProof);

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct VrfPreout[32];
}
array_type_impl_zero_default!(VrfPreout);
array_type_impl_hex_str!(VrfPreout);
array_type_impl_debug_as_display!(VrfPreout);

array_type_define! {
    /// Uniformly distributed VRF output
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct VrfOutput[32];
}
array_type_impl_zero_default!(VrfOutput);
array_type_impl_hex_str!(VrfOutput);
array_type_impl_debug_as_display!(VrfOutput);

impl VrfOutput {
    /// The output as a fraction in `[0, 1)`
    ///
    /// Only the first 8 bytes are used, which is plenty of precision for the
    /// binomial sampling.
    pub fn to_unit_fraction(self) -> f64 {
        let mut first = [0u8; 8];
        first.copy_from_slice(&self.0[..8]);
        // 2^64
        u64::from_be_bytes(first) as f64 / 18_446_744_073_709_551_616.0
    }
}

#[derive(Debug, Snafu)]
pub enum SortitionError {
    // `schnorrkel::SignatureError` is not a `std::error::Error`
    #[snafu(display("Malformed VRF secret key"))]
    InvalidKey,
}

pub type SortitionResult<T> = Result<T, SortitionError>;

impl VrfSeckey {
    pub fn generate() -> Self {
        rand::random()
    }

    fn to_keypair(self) -> SortitionResult<schnorrkel::Keypair> {
        Ok(MiniSecretKey::from_bytes(&self.0)
            .ok()
            .context(InvalidKeySnafu)?
            .expand_to_keypair(ExpansionMode::Uniform))
    }

    pub fn pubkey(self) -> SortitionResult<VrfPubkey> {
        Ok(VrfPubkey(self.to_keypair()?.public.to_bytes()))
    }
}

/// Proof that a validator ran the sortition for a given slot
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub struct VrfSortitionCredential {
    pub period: Period,
    pub round: Round,
    pub step: Step,
    pub output: VrfOutput,
    pub preout: VrfPreout,
    pub proof: VrfProof,
}

#[derive(Encode)]
struct VrfInput {
    period: Period,
    round: Round,
    step: Step,
}

impl VrfInput {
    fn to_bytes(&self) -> Vec<u8> {
        dagbft_util_bincode::encode_infallible(self, CONSENSUS_BINCODE_CONFIG)
    }
}

pub fn compute_credential(
    seckey: VrfSeckey,
    period: Period,
    round: Round,
    step: Step,
) -> SortitionResult<VrfSortitionCredential> {
    let keypair = seckey.to_keypair()?;
    let input = VrfInput {
        period,
        round,
        step,
    }
    .to_bytes();

    let context = signing_context(VRF_SIGNING_CONTEXT);
    let (inout, proof, _) = keypair.vrf_sign(context.bytes(&input));
    let output: [u8; 32] = inout.make_bytes(VRF_OUTPUT_CONTEXT);

    Ok(VrfSortitionCredential {
        period,
        round,
        step,
        output: VrfOutput(output),
        preout: VrfPreout(inout.to_preout().0),
        proof: VrfProof(proof.to_bytes()),
    })
}

/// Check `credential` was produced by the owner of `pubkey`
///
/// Anything malformed is simply not valid.
pub fn verify_credential(pubkey: VrfPubkey, credential: &VrfSortitionCredential) -> bool {
    let Ok(public) = PublicKey::from_bytes(pubkey.as_slice()) else {
        return false;
    };
    let Ok(proof) = VRFProof::from_bytes(credential.proof.as_slice()) else {
        return false;
    };
    let preout = VRFPreOut(credential.preout.to_bytes());
    let input = VrfInput {
        period: credential.period,
        round: credential.round,
        step: credential.step,
    }
    .to_bytes();

    let context = signing_context(VRF_SIGNING_CONTEXT);
    let Ok((inout, _)) = public.vrf_verify(context.bytes(&input), &preout, &proof) else {
        return false;
    };

    let expected: [u8; 32] = inout.make_bytes(VRF_OUTPUT_CONTEXT);
    expected == credential.output.to_bytes()
}
