// SPDX-License-Identifier: MIT

//! Core types of the DAG-anchored PBFT consensus
//!
//! Focused on serialization/encoding, hashing, signing and the cryptographic
//! sortition: everything that has to be bit-for-bit identical between
//! validators, with no state or I/O.
use ::bincode::{Decode, Encode};
use dagbft_util_array_type::{
    array_type_define, array_type_impl_base32_str, array_type_impl_debug_as_display,
    array_type_impl_serde, array_type_impl_zero_default,
};

/// 32-byte hash newtype with hex formatting and a `NULL` (all-zero) value
#[macro_export]
macro_rules! hash_type_define {
    (
        $(#[$outer:meta])*
        pub struct $name:tt;
    ) => {
        dagbft_util_array_type::array_type_define! {
            $(#[$outer])*
            #[derive(::bincode::Encode, ::bincode::Decode, Copy, Clone, Hash)]
            pub struct $name[32];
        }
        dagbft_util_array_type::array_type_impl_zero_default!($name);
        dagbft_util_array_type::array_type_impl_hex_str!($name);
        dagbft_util_array_type::array_type_impl_serde!($name);
        dagbft_util_array_type::array_type_impl_debug_as_display!($name);

        impl From<blake3::Hash> for $name {
            fn from(value: blake3::Hash) -> Self {
                Self(*value.as_bytes())
            }
        }

        impl $name {
            /// The all-zero value, standing for "nothing"
            pub const NULL: Self = Self::ZERO;

            pub fn is_null(&self) -> bool {
                *self == Self::NULL
            }
        }
    };
}

pub mod bincode;
pub mod block;
pub mod keys;
pub mod msg;
pub mod period;
pub mod signed;
pub mod sortition;
pub mod stake;
pub mod timestamp;
pub mod validator;
pub mod vote;
pub mod vrf;

array_type_define! {
    #[derive(Encode, Decode, Copy, Clone, Hash)]
    pub struct Signature[64];
}
array_type_impl_zero_default!(Signature);
array_type_impl_base32_str!(Signature);
array_type_impl_serde!(Signature);
array_type_impl_debug_as_display!(Signature);

impl From<Signature> for ed25519_dalek::Signature {
    fn from(value: Signature) -> Self {
        ed25519_dalek::Signature::from_bytes(&value.0)
    }
}
impl From<ed25519_dalek::Signature> for Signature {
    fn from(value: ed25519_dalek::Signature) -> Self {
        Self(value.to_bytes())
    }
}
