mod common;

use common::{certificate, coinbase_out, spend, Node, SC_VALUE};
use zend::admission::AdmitOutcome;
use zend::mempool::MempoolErrorKind;
use zend_primitives::OutPoint;

#[test]
fn zero_fee_needs_old_inputs() {
    let node = Node::new();
    let mined = node.mine_empty(101);

    // One hundred blocks of age on a full coinbase is plenty of priority.
    let (input, value) = coinbase_out(&mined[0]);
    let free = spend(vec![input], vec![value]);
    let free_id = free.txid();
    node.admit_tx(free, true).expect("free spend of an old coin");
    assert!(node.in_pool(&free_id));

    // A pool output has no age at all.
    let child = spend(vec![OutPoint::new(free_id, 0)], vec![value]);
    let err = node.admit_tx(child.clone(), true).expect_err("no priority");
    assert_eq!(err.kind, MempoolErrorKind::InsufficientFee);
    assert_eq!(err.message, "insufficient priority");

    // Local submissions skip the free relay rules.
    node.admit_tx(child, false).expect("unlimited");
    assert_eq!(node.pool_size(), 2);
}

#[test]
fn immature_coinbase_is_rejected() {
    let node = Node::new();
    let mined = node.mine_empty(101);
    let (input, value) = coinbase_out(&mined[50]);
    let err = node
        .admit_tx(spend(vec![input], vec![value - 1_000]), false)
        .expect_err("immature");
    assert_eq!(err.kind, MempoolErrorKind::InvalidTransaction);
    assert_eq!(err.message, "premature-spend-of-coinbase");
}

#[test]
fn double_spends_conflict_and_blocks_evict_the_loser() {
    let node = Node::new();
    let mined = node.mine_empty(101);
    let (input, value) = coinbase_out(&mined[0]);

    let first = spend(vec![input.clone()], vec![value - 1_000]);
    let first_id = first.txid();
    node.admit_tx(first.clone(), false).expect("first spend");

    let err = node
        .admit_tx(first, false)
        .expect_err("already in the pool");
    assert_eq!(err.kind, MempoolErrorKind::AlreadyInMempool);

    let second = spend(vec![input], vec![value - 2_000, 500]);
    let err = node
        .admit_tx(second.clone(), false)
        .expect_err("conflicting spend");
    assert_eq!(err.kind, MempoolErrorKind::ConflictingInput);
    assert_eq!(err.message, "txn-mempool-conflict");

    let (_, report) = node.mine(vec![second], Vec::new());
    assert!(report.removed.contains(&first_id));
    assert!(!node.in_pool(&first_id));
    assert_eq!(node.pool_size(), 0);
}

#[test]
fn confirmed_transaction_is_already_known() {
    let node = Node::new();
    let mined = node.mine_empty(101);
    let (input, value) = coinbase_out(&mined[0]);
    let tx = spend(vec![input], vec![value - 1_000]);
    node.mine(vec![tx.clone()], Vec::new());

    let err = node.admit_tx(tx, false).expect_err("confirmed");
    assert_eq!(err.kind, MempoolErrorKind::AlreadyKnown);
}

#[test]
fn orphans_are_admitted_once_the_parent_arrives() {
    let node = Node::new();
    let mined = node.mine_empty(101);
    let (input, value) = coinbase_out(&mined[0]);

    let parent = spend(vec![input], vec![value - 1_000]);
    let parent_id = parent.txid();
    let child = spend(vec![OutPoint::new(parent_id, 0)], vec![value - 2_000]);
    let child_id = child.txid();

    let err = node.admit_tx(child, false).expect_err("parent unknown");
    assert_eq!(err.kind, MempoolErrorKind::MissingInput);
    assert_eq!(err.missing_inputs, vec![OutPoint::new(parent_id, 0)]);
    assert_eq!(node.ctx.read().mempool.orphan_count(), 1);
    assert!(!node.in_pool(&child_id));

    node.admit_tx(parent, false).expect("parent");
    assert!(node.in_pool(&parent_id));
    assert!(node.in_pool(&child_id));
    assert_eq!(node.ctx.read().mempool.orphan_count(), 0);
}

#[test]
fn higher_quality_certificate_replaces_the_pool_one() {
    let (node, sc_id) = Node::with_sidechain(111, None);
    let end_hash = node.block_hash(111);

    let low = certificate(sc_id, 0, 1, end_hash, &[1_000_000]);
    node.admit_cert(low.clone()).expect("first certificate");
    assert!(node.in_pool(&low.hash()));

    let high = certificate(sc_id, 0, 2, end_hash, &[2_000_000]);
    match node.admit_cert(high.clone()).expect("better certificate") {
        AdmitOutcome::Accepted { replaced, .. } => assert_eq!(replaced, vec![low.hash()]),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!node.in_pool(&low.hash()));

    let worse = certificate(sc_id, 0, 1, end_hash, &[500_000]);
    let err = node.admit_cert(worse).expect_err("lower quality");
    assert_eq!(err.message, "sc-cert-quality-below-mempool");

    let greedy = certificate(sc_id, 0, 3, end_hash, &[SC_VALUE + 1]);
    let err = node.admit_cert(greedy).expect_err("over the balance");
    assert_eq!(err.kind, MempoolErrorKind::InvalidCertificate);

    let (_, report) = node.mine(Vec::new(), vec![high.clone()]);
    assert!(report.removed.contains(&high.hash()));
    assert_eq!(node.pool_size(), 0);
}

#[test]
fn certificate_for_an_unknown_sidechain_is_rejected() {
    let (node, _) = Node::with_sidechain(111, None);
    let end_hash = node.block_hash(111);
    let err = node
        .admit_cert(certificate([0x99; 32], 0, 1, end_hash, &[1_000]))
        .expect_err("unknown sidechain");
    assert_eq!(err.message, "bad-sc-cert-unknown-sidechain");
}
