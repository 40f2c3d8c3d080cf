use std::io::Write as _;
use std::ops;

use bincode::{Decode, Encode};
use ed25519_dalek::ed25519::signature::SignerMut as _;
use snafu::{OptionExt as _, Snafu};

use crate::Signature;
use crate::bincode::CONSENSUS_BINCODE_CONFIG;
use crate::validator::{ValidatorPubkey, ValidatorSeckey};

#[derive(Debug, Snafu)]
pub struct InvalidSignatureError;

pub type InvalidSignatureResult<T> = Result<T, InvalidSignatureError>;

pub trait Hashable: bincode::Encode {
    fn hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();

        bincode::encode_into_std_write(self, &mut hasher, CONSENSUS_BINCODE_CONFIG)
            .expect("Can't fail");

        hasher.finalize()
    }
}

/// A message that can be signed/verified by [`ValidatorPubkey`] identity
pub trait Signable: Hashable {
    /// Unique tag preventing two different type of messages with the same
    /// encoding from conflicting with each other
    const TAG: [u8; 4];

    fn sign_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();

        hasher.write_all(b"dagbft").expect("Can't fail");
        hasher.write_all(&Self::TAG).expect("Can't fail");
        hasher
            .write_all(self.hash().as_bytes())
            .expect("Can't fail");

        hasher.finalize()
    }

    fn sign_with(&self, seckey: ValidatorSeckey) -> Signature {
        let v = ed25519_dalek::SigningKey::from(seckey).sign(self.sign_hash().as_bytes());
        v.into()
    }

    fn verify_signature(
        &self,
        pubkey: ValidatorPubkey,
        sig: Signature,
    ) -> InvalidSignatureResult<()> {
        verify_hash_signature(self.sign_hash(), pubkey, sig)
    }
}

fn verify_hash_signature(
    hash: blake3::Hash,
    pubkey: ValidatorPubkey,
    sig: Signature,
) -> InvalidSignatureResult<()> {
    // The pubkey comes off the wire and might not even be a curve point
    ed25519_dalek::VerifyingKey::try_from(pubkey)
        .ok()
        .context(InvalidSignatureSnafu)?
        .verify_strict(hash.as_bytes(), &sig.into())
        .ok()
        .context(InvalidSignatureSnafu)?;
    Ok(())
}

#[derive(Decode, Encode, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signed<T> {
    pub inner: T,
    pub sig: Signature,
}

impl<T> Signed<T>
where
    T: Signable,
{
    pub fn new(inner: T, sig: Signature) -> Self {
        Self { inner, sig }
    }

    pub fn new_sign(inner: T, seckey: ValidatorSeckey) -> Self {
        let sig = inner.sign_with(seckey);
        Self { inner, sig }
    }

    pub fn verify_sig_validator(&self, pubkey: ValidatorPubkey) -> InvalidSignatureResult<()> {
        self.verify_signature(pubkey, self.sig)
    }
}

impl<T> ops::Deref for Signed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
