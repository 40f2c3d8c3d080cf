use core::fmt;

use bincode::{Decode, Encode};
use dagbft_util_array_type::{
    array_type_define, array_type_impl_base32_str, array_type_impl_bytes_conv,
    array_type_impl_debug_as_display, array_type_impl_rand, array_type_impl_serde,
    array_type_impl_zero_default,
};
use snafu::Snafu;

array_type_define! {
    /// Validator identity: ed25519 public key votes and blocks are signed with
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct ValidatorPubkey[32];
}

impl ValidatorPubkey {
    pub fn to_short(self) -> ValidatorPubkeyShort {
        ValidatorPubkeyShort(self)
    }
}

pub struct ValidatorPubkeyShort(ValidatorPubkey);

impl fmt::Display for ValidatorPubkeyShort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}...{}",
            data_encoding::BASE32_DNSCURVE.encode_display(&self.0.as_slice()[0..4]),
            data_encoding::BASE32_DNSCURVE.encode_display(&self.0.as_slice()[28..32])
        ))
    }
}

array_type_impl_zero_default!(ValidatorPubkey);
array_type_impl_base32_str!(ValidatorPubkey);
array_type_impl_serde!(ValidatorPubkey);
array_type_impl_debug_as_display!(ValidatorPubkey);
array_type_impl_rand!(ValidatorPubkey);

#[derive(Debug, Snafu)]
pub struct InvalidPubkeyError;

impl TryFrom<ValidatorPubkey> for ed25519_dalek::VerifyingKey {
    type Error = InvalidPubkeyError;

    fn try_from(value: ValidatorPubkey) -> Result<Self, Self::Error> {
        ed25519_dalek::VerifyingKey::from_bytes(&value.0).map_err(|_| InvalidPubkeyError)
    }
}

array_type_define! {
    #[derive(Encode, Decode, Clone, Copy)]
    pub struct ValidatorSeckey[32];
}

impl ValidatorSeckey {
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()).to_bytes())
    }

    pub fn pubkey(self) -> ValidatorPubkey {
        ValidatorPubkey(
            ed25519_dalek::SigningKey::from(self)
                .verifying_key()
                .to_bytes(),
        )
    }
}

impl From<ValidatorSeckey> for ed25519_dalek::SigningKey {
    fn from(value: ValidatorSeckey) -> Self {
        ed25519_dalek::SigningKey::from_bytes(&value.0)
    }
}

array_type_impl_bytes_conv!(ValidatorSeckey);
array_type_impl_zero_default!(ValidatorSeckey);
array_type_impl_base32_str!(ValidatorSeckey);
