// SPDX-License-Identifier: MIT

pub use bincode;
use bincode::config::Config;
use bincode::{de, enc, error};

/// Decode `D` from `src`, failing if any bytes are left over
pub fn decode_whole<D: de::Decode<()>, C: Config>(
    src: &[u8],
    config: C,
) -> Result<D, error::DecodeError> {
    let (t, consumed) = bincode::decode_from_slice(src, config)?;

    if consumed != src.len() {
        return Err(bincode::error::DecodeError::Other("leftover bytes"));
    }

    Ok(t)
}

/// Encode into a `Vec`, for types whose encoding can't fail
///
/// Encoding into memory only fails on writer errors or for types
/// with invalid custom `Encode` impls, none of which apply to the plain
/// data types this is meant for.
pub fn encode_infallible<E: enc::Encode, C: Config>(value: &E, config: C) -> Vec<u8> {
    bincode::encode_to_vec(value, config).expect("Encoding into a Vec can't fail")
}
