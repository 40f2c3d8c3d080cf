use std::collections::HashSet;

use super::SimDag;

#[test]
fn order_ends_with_anchor_and_respects_parents() {
    let dag = SimDag::new();
    let genesis = dag.add_block(&[]);
    let a = dag.add_block(&[genesis]);
    let b = dag.add_block(&[genesis]);
    let c = dag.add_block(&[a, b]);

    let order = dag.order_from(c, &HashSet::new()).expect("known anchor");
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], genesis);
    assert_eq!(*order.last().expect("non-empty"), c);

    let pos = |h| order.iter().position(|x| *x == h).expect("ordered");
    assert!(pos(a) < pos(c));
    assert!(pos(b) < pos(c));
}

#[test]
fn order_skips_excluded() {
    let dag = SimDag::new();
    let genesis = dag.add_block(&[]);
    let a = dag.extend();
    let b = dag.extend();

    let ordered: HashSet<_> = [genesis, a].into_iter().collect();
    assert_eq!(dag.order_from(b, &ordered), Some(vec![b]));
    assert_eq!(dag.order_from(a, &ordered), Some(vec![]));
}

#[test]
fn unknown_anchor() {
    let dag = SimDag::new();
    let genesis = dag.add_block(&[]);
    let other = SimDag::new();
    other.add_block(&[]);
    let foreign = other.extend();

    assert!(dag.contains(genesis));
    assert_eq!(dag.order_from(foreign, &HashSet::new()), None);
}

#[test]
fn tips_follow_extensions() {
    let dag = SimDag::new();
    assert!(dag.is_empty());
    let genesis = dag.add_block(&[]);
    let a = dag.add_block(&[genesis]);
    let b = dag.add_block(&[genesis]);

    let mut tips = vec![a, b];
    tips.sort();
    assert_eq!(dag.tips(), tips);

    let c = dag.extend();
    assert_eq!(dag.tips(), vec![c]);
    assert_eq!(dag.latest(), Some(c));
}
