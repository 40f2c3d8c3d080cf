//! Counters locating a vote or block in the consensus timeline
//!
//! All three are big-endian encoded, so database keys built from them
//! iterate in numeric order.
use bincode::{Decode, Encode};
use dagbft_util_array_type::{array_type_fixed_size_define, array_type_fixed_size_impl_serde};

array_type_fixed_size_define! {
    /// One unit of finalized chain progress
    ///
    /// Exactly one block gets certified per period, so the period being
    /// worked on is always `chain_size + 1`.
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Period(u64);
}
array_type_fixed_size_impl_serde!(Period);

array_type_fixed_size_define! {
    /// Attempt number within a [`Period`], starting at `1`
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Round(u64);
}
array_type_fixed_size_impl_serde!(Round);

array_type_fixed_size_define! {
    /// Phase within a [`Round`], starting at `1`
    ///
    /// `1` proposes, `2` filters (soft votes), `3` certifies, and from `4` on
    /// even steps are "finish" and odd ones "finish polling".
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Step(u64);
}
array_type_fixed_size_impl_serde!(Step);

impl Period {
    pub const FIRST: Self = Self::new(1);
}

impl Round {
    pub const FIRST: Self = Self::new(1);
}

impl Step {
    pub const PROPOSE: Self = Self::new(1);
    pub const FILTER: Self = Self::new(2);
    pub const CERTIFY: Self = Self::new(3);
    pub const FIRST_FINISH: Self = Self::new(4);

    /// Finish steps are the even ones from [`Step::FIRST_FINISH`] on
    pub fn is_finish(self) -> bool {
        Self::FIRST_FINISH <= self && self.to_number() % 2 == 0
    }

    pub fn is_finish_polling(self) -> bool {
        Self::FIRST_FINISH < self && self.to_number() % 2 == 1
    }
}
