use std::iter;

use bincode::{Decode, Encode};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Amount of delegated stake backing a validator
#[derive(
    Encode,
    Decode,
    Serialize,
    Deserialize,
    From,
    Display,
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub struct Stake(u64);

impl Stake {
    pub const ZERO: Self = Self(0);

    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub const fn to_number(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl iter::Sum for Stake {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.fold(0u64, |acc, s| acc.saturating_add(s.0)))
    }
}

/// Number of votes a sortition credential entitles a validator to
///
/// Quorums are counted in weight, never in number of voters.
#[derive(
    Encode,
    Decode,
    Serialize,
    Deserialize,
    From,
    Display,
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub struct Weight(u64);

impl Weight {
    pub const ZERO: Self = Self(0);

    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub const fn to_number(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl iter::Sum for Weight {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}
