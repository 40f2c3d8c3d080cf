use std::sync::Arc;

use dagbft_consensus::interfaces::{DagOrderError, FinalChain as _};
use dagbft_consensus_core::block::DagBlockHash;
use dagbft_consensus_core::period::Period;

use super::SimFinalChain;
use crate::dag::SimDag;

#[test]
fn executing_orders_blocks() {
    let dag = Arc::new(SimDag::new());
    let genesis = dag.add_block(&[]);
    let a = dag.extend();
    let chain = SimFinalChain::new(dag.clone());

    assert_eq!(chain.current_frontier().pivot, Some(a));
    let order = chain.dag_order(a, Period::FIRST).expect("orderable");
    assert_eq!(order, vec![genesis, a]);

    let root = chain
        .execute_period(Period::FIRST, a, &order)
        .expect("executes");
    assert_eq!(chain.state_root(Period::FIRST), Some(root));
    assert_eq!(chain.executed_period(), Period::FIRST);
    assert!(chain.is_ordered(genesis));

    assert!(matches!(
        chain.dag_order(a, Period::new(2)),
        Err(DagOrderError::AlreadyOrdered { .. })
    ));
    let b = dag.extend();
    assert_eq!(chain.dag_order(b, Period::new(2)).expect("orderable"), vec![b]);
}

#[test]
fn same_history_same_roots() {
    let dag = Arc::new(SimDag::new());
    dag.add_block(&[]);
    let a = dag.extend();
    let first = SimFinalChain::new(dag.clone());
    let second = SimFinalChain::new(dag.clone());

    for chain in [&first, &second] {
        let order = chain.dag_order(a, Period::FIRST).expect("orderable");
        chain
            .execute_period(Period::FIRST, a, &order)
            .expect("executes");
        chain
            .execute_period(Period::new(2), DagBlockHash::NULL, &[])
            .expect("executes");
    }
    assert_eq!(
        first.state_root(Period::new(2)),
        second.state_root(Period::new(2))
    );
    assert_ne!(first.state_root(Period::FIRST), first.state_root(Period::new(2)));
}

#[test]
fn injected_faults() {
    let dag = Arc::new(SimDag::new());
    dag.add_block(&[]);
    let a = dag.extend();
    let chain = SimFinalChain::new(dag.clone());

    chain.mark_anchor_stale(a);
    assert!(matches!(
        chain.dag_order(a, Period::FIRST),
        Err(DagOrderError::AlreadyOrdered { .. })
    ));
    assert!(matches!(
        chain.dag_order(DagBlockHash::from_bytes([9; 32]), Period::FIRST),
        Err(DagOrderError::UnknownAnchor { .. })
    ));

    chain
        .execute_period(Period::new(2), DagBlockHash::NULL, &[])
        .expect_err("period 1 not executed yet");

    chain.fail_execution_at(Period::FIRST);
    chain
        .execute_period(Period::FIRST, DagBlockHash::NULL, &[])
        .expect_err("injected");
    assert_eq!(chain.state_root(Period::FIRST), None);
}
