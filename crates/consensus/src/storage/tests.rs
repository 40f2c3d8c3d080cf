use std::sync::Arc;

use dagbft_consensus_core::block::BlockHash;
use dagbft_consensus_core::keys::ValidatorKeys;
use dagbft_consensus_core::period::{Period, Round, Step};
use dagbft_db::Database;

use super::{DbStorage, RoundState};
use crate::interfaces::Storage as _;
use crate::test_utils::{StaticDpos, block_hash, certified_block, signed_block};

fn storage() -> DbStorage {
    DbStorage::new(Arc::new(Database::new_in_memory().expect("in-memory db"))).expect("storage")
}

#[test_log::test]
fn round_state_roundtrip() {
    let storage = storage();
    assert_eq!(storage.load_round_state().expect("load"), None);

    let state = RoundState {
        step: Step::new(7),
        cert_voted_block: Some(block_hash(3)),
        next_voted_null: true,
        ..RoundState::new(Period::new(4), Round::new(2))
    };
    storage.save_round_state(&state).expect("save");
    assert_eq!(storage.load_round_state().expect("load"), Some(state));
}

#[test_log::test]
fn chain_appends_in_order_only() {
    let storage = storage();
    let keys = ValidatorKeys::generate();

    let first = certified_block(&keys, Period::FIRST, BlockHash::NULL);
    let second = certified_block(&keys, Period::new(2), first.block_hash());

    storage
        .append_certified(&second)
        .expect_err("chain starts at the first period");
    storage.append_certified(&first).expect("append");
    storage
        .append_certified(&first)
        .expect_err("period already there");
    storage.append_certified(&second).expect("append");

    assert_eq!(
        storage.load_chain_hashes().expect("load"),
        vec![first.block_hash(), second.block_hash()]
    );
    assert_eq!(
        storage
            .load_certified(Period::new(2))
            .expect("load")
            .map(|b| b.block_hash()),
        Some(second.block_hash())
    );
    assert!(storage.load_certified(Period::new(3)).expect("load").is_none());
}

#[test_log::test]
fn votes_and_blocks_pruned_by_period() {
    let storage = storage();
    let dpos = StaticDpos::new(&[1, 1, 1, 1]);

    for p in 1..=3 {
        let period = Period::new(p);
        storage
            .persist_block(&signed_block(&dpos.keys[0], period, block_hash(p as u8)))
            .expect("persist");
        for i in 0..2 {
            let vote = dpos.vote(i, block_hash(1), period, Round::FIRST, Step::CERTIFY);
            storage.persist_vote(&vote).expect("persist");
            // Writes are keyed, repeating one is a no-op
            storage.persist_vote(&vote).expect("persist");
        }
    }
    // Null and value next votes of one voter are both kept
    storage
        .persist_vote(&dpos.vote(0, block_hash(1), Period::new(3), Round::FIRST, Step::new(4)))
        .expect("persist");
    storage
        .persist_vote(&dpos.vote(0, BlockHash::NULL, Period::new(3), Round::FIRST, Step::new(4)))
        .expect("persist");

    assert_eq!(storage.load_votes(Period::FIRST).expect("load").len(), 8);
    assert_eq!(storage.load_votes(Period::new(3)).expect("load").len(), 4);
    assert_eq!(storage.load_proposed_blocks().expect("load").len(), 3);

    storage.prune_below(Period::new(3)).expect("prune");

    let votes = storage.load_votes(Period::FIRST).expect("load");
    assert_eq!(votes.len(), 4);
    assert!(votes.iter().all(|v| v.period == Period::new(3)));
    let blocks = storage.load_proposed_blocks().expect("load");
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].period, Period::new(3));
}

#[test_log::test]
fn reopening_keeps_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("consensus.redb");
    let keys = ValidatorKeys::generate();
    let block = certified_block(&keys, Period::FIRST, BlockHash::NULL);

    {
        let storage =
            DbStorage::new(Arc::new(Database::open(&path).expect("open"))).expect("storage");
        storage.append_certified(&block).expect("append");
    }

    let storage = DbStorage::new(Arc::new(Database::open(&path).expect("open"))).expect("storage");
    assert_eq!(
        storage.load_chain_hashes().expect("load"),
        vec![block.block_hash()]
    );
}
