use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::period::Period;

use super::{BlockValidity, ProposedBlocks};
use crate::InsertOutcome;
use crate::test_utils::{block_hash, signed_block};

#[test]
fn push_mark_and_cleanup() {
    let blocks = ProposedBlocks::new();
    let keys = ValidatorKeys::generate();

    let a = signed_block(&keys, Period::FIRST, block_hash(1));
    let b = signed_block(&keys, Period::new(2), block_hash(2));
    let c = signed_block(&keys, Period::new(2), block_hash(3));

    assert!(blocks.push(a.clone()).is_inserted());
    assert!(blocks.push(b.clone()).is_inserted());
    assert!(blocks.push(c.clone()).is_inserted());
    assert_eq!(
        blocks.push(a.clone()),
        InsertOutcome::AlreadyPresent(BlockValidity::Unchecked)
    );
    assert!(blocks.contains(Period::new(2), b.block_hash()));

    blocks.mark_valid(Period::FIRST, a.block_hash());
    blocks.mark_invalid(Period::new(2), b.block_hash());
    assert_eq!(
        blocks.get(Period::FIRST, a.block_hash()).map(|(_, v)| v),
        Some(BlockValidity::Valid)
    );
    assert_eq!(
        blocks.get(Period::new(2), b.block_hash()).map(|(_, v)| v),
        Some(BlockValidity::Invalid)
    );
    // Wrong period is a different key
    assert!(!blocks.contains(Period::new(2), a.block_hash()));

    blocks.cleanup(Period::new(2));
    assert!(!blocks.contains(Period::FIRST, a.block_hash()));
    assert!(blocks.contains(Period::new(2), c.block_hash()));
    assert!(blocks.contains(Period::new(2), b.block_hash()));
}
