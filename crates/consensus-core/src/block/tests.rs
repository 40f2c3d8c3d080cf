use crate::bincode::STD_BINCODE_CONFIG;
use crate::block::{
    BlockHash, DagBlockHash, ExtraData, OrderHash, PbftBlock, SignedPbftBlock, StateRoot,
    calculate_order_hash,
};
use crate::period::Period;
use crate::timestamp::Timestamp;
use crate::validator::ValidatorSeckey;

fn test_block(seckey: ValidatorSeckey) -> PbftBlock {
    let order = [DagBlockHash::from_bytes([1; 32]), DagBlockHash::from_bytes([2; 32])];
    PbftBlock::builder()
        .period(Period::new(3))
        .prev_block_hash(BlockHash::from_bytes([7; 32]))
        .anchor_hash(order[1])
        .order_hash(calculate_order_hash(&order))
        .prev_state_root(StateRoot::from_bytes([8; 32]))
        .beneficiary(seckey.pubkey())
        .timestamp(Timestamp::from(1_700_000_000_000_000))
        .build()
}

#[test]
fn order_hash_of_empty_order_is_null() {
    assert_eq!(calculate_order_hash(&[]), OrderHash::NULL);

    let a = DagBlockHash::from_bytes([1; 32]);
    let b = DagBlockHash::from_bytes([2; 32]);
    let ab = calculate_order_hash(&[a, b]);
    assert!(!ab.is_null());
    assert_ne!(ab, calculate_order_hash(&[b, a]));
    assert_eq!(ab, calculate_order_hash(&[a, b]));
}

#[test]
fn block_identity_ignores_signature() {
    let seckey = ValidatorSeckey::generate();
    let block = test_block(seckey);

    let signed = SignedPbftBlock::new_sign(block.clone(), seckey);
    let resigned = SignedPbftBlock::new_sign(block.clone(), ValidatorSeckey::generate());

    assert_eq!(signed.block_hash(), block.hash());
    assert_eq!(signed.block_hash(), resigned.block_hash());
    assert!(!signed.block_hash().is_null());
}

#[test]
fn block_signature_verifies() {
    let seckey = ValidatorSeckey::generate();
    let signed = SignedPbftBlock::new_sign(test_block(seckey), seckey);

    signed
        .verify_sig_validator(seckey.pubkey())
        .expect("valid signature");
    assert!(
        signed
            .verify_sig_validator(ValidatorSeckey::generate().pubkey())
            .is_err()
    );

    let mut tampered = signed.clone();
    tampered.inner.period = Period::new(4);
    assert!(tampered.verify_sig_validator(seckey.pubkey()).is_err());
}

#[test]
fn any_field_changes_block_hash() {
    let seckey = ValidatorSeckey::generate();
    let block = test_block(seckey);

    let mut with_extra = block.clone();
    with_extra.extra_data = Some(ExtraData {
        version: "1.0".into(),
        pillar_block_hash: None,
    });
    assert_ne!(block.hash(), with_extra.hash());

    let mut empty = block.clone();
    empty.anchor_hash = DagBlockHash::NULL;
    assert!(empty.is_empty());
    assert!(!block.is_empty());
    assert_ne!(block.hash(), empty.hash());
}

#[test]
fn block_encoding_roundtrip() {
    let seckey = ValidatorSeckey::generate();
    let signed = SignedPbftBlock::new_sign(test_block(seckey), seckey);

    let bytes = dagbft_util_bincode::encode_infallible(&signed, STD_BINCODE_CONFIG);
    let decoded: SignedPbftBlock =
        dagbft_util_bincode::decode_whole(&bytes, STD_BINCODE_CONFIG).expect("valid encoding");
    assert_eq!(decoded, signed);
}
