use crate::block::BlockHash;
use crate::keys::ValidatorKeys;
use crate::period::{Period, Round, Step};
use crate::stake::Weight;
use crate::vote::{SignedVote, VoteType};

#[test]
fn vote_type_from_step() {
    assert_eq!(VoteType::from_step(Step::PROPOSE), VoteType::Propose);
    assert_eq!(VoteType::from_step(Step::FILTER), VoteType::Soft);
    assert_eq!(VoteType::from_step(Step::CERTIFY), VoteType::Cert);
    for step in 4..20 {
        assert_eq!(VoteType::from_step(Step::new(step)), VoteType::Next);
    }
}

#[test]
fn finish_step_parity() {
    assert!(!Step::CERTIFY.is_finish());
    assert!(Step::new(4).is_finish());
    assert!(!Step::new(4).is_finish_polling());
    assert!(Step::new(5).is_finish_polling());
    assert!(Step::new(12).is_finish());
    assert!(!Step::new(3).is_finish_polling());
}

#[test]
fn signed_vote_verifies_and_hashes() {
    let keys = ValidatorKeys::generate();
    let block = BlockHash::from_bytes([4; 32]);

    let vote: SignedVote = keys
        .sign_vote(block, Period::new(2), Round::new(1), Step::CERTIFY, Weight::new(5))
        .expect("valid keys");

    assert_eq!(vote.vote_type, VoteType::Cert);
    assert!(vote.credential_matches_slot());
    vote.verify_sig_validator(keys.pubkey())
        .expect("valid signature");

    let again = keys
        .sign_vote(block, Period::new(2), Round::new(1), Step::CERTIFY, Weight::new(5))
        .expect("valid keys");
    // Same slot and value, but sortition proofs are randomized
    assert_eq!(vote.credential.output, again.credential.output);

    let other = keys
        .sign_vote(
            BlockHash::NULL,
            Period::new(2),
            Round::new(1),
            Step::CERTIFY,
            Weight::new(5),
        )
        .expect("valid keys");
    assert_ne!(vote.vote_hash(), other.vote_hash());

    let mut tampered = vote;
    tampered.inner.weight = Weight::new(6);
    assert!(tampered.verify_sig_validator(keys.pubkey()).is_err());
}
