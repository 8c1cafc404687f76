mod common;

use common::{coinbase_out, spend, Harness};
use zend_chainstate::delay::DelayPolicy;
use zend_chainstate::view::CoinSource;
use zend_chainstate::ChainEvent;
use zend_primitives::OutPoint;
use zend_storage::Column;

#[test]
fn double_spend_in_one_block_leaves_the_ledger_untouched() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    let mined = harness.mine_empty(101);
    let before = harness.ledger();
    let tip = harness.tip();

    let (input, value) = coinbase_out(&mined[0]);
    let first = spend(vec![input], vec![value - 1_000]);
    let second = spend(vec![input], vec![value - 2_000]);
    let reason = harness.reject(vec![first, second], Vec::new());
    assert_eq!(reason, "bad-txns-inputs-missingorspent");
    assert_eq!(harness.tip(), tip);
    assert_eq!(harness.ledger(), before);

    // The output is still spendable by a valid block.
    harness.mine(vec![spend(vec![input], vec![value - 1_000])], Vec::new());
}

#[test]
fn coinbase_needs_one_hundred_confirmations() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    let mined = harness.mine_empty(100);

    let young = spend(vec![coinbase_out(&mined[1]).0], vec![1_000]);
    assert_eq!(
        harness.reject(vec![young], Vec::new()),
        "premature-spend-of-coinbase"
    );

    let (input, value) = coinbase_out(&mined[0]);
    harness.mine(vec![spend(vec![input], vec![value])], Vec::new());
    assert_eq!(harness.height(), 101);
}

#[test]
fn failing_script_rejects_the_block() {
    let mut harness = Harness::with_threads(DelayPolicy::disabled(), 2);
    let mined = harness.mine_empty(101);

    let (input, value) = coinbase_out(&mined[0]);
    let mut locked = spend(vec![input], vec![value - 1_000, 1_000]);
    // OP_0 leaves false on the stack for whoever spends it.
    locked.vout[1].script_pubkey = vec![0x00];
    harness.mine(vec![locked.clone()], Vec::new());

    let good = spend(vec![OutPoint::new(locked.txid(), 0)], vec![value - 2_000]);
    let bad = spend(vec![OutPoint::new(locked.txid(), 1)], vec![500]);
    assert_eq!(
        harness.reject(vec![good.clone(), bad], Vec::new()),
        "mandatory-script-verify-flag-failed"
    );
    harness.mine(vec![good], Vec::new());
}

#[test]
fn coinbase_may_not_claim_more_than_subsidy_and_fees() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    harness.mine_empty(3);
    let mut block = harness.build(&harness.tip(), Vec::new(), Vec::new(), 9);
    block.transactions[0].vout[0].value += 1;
    block.header.merkle_root = block.compute_merkle_root().0;
    let events = harness.submit(&block).expect("submit");
    assert!(events.iter().any(|event| matches!(
        event,
        ChainEvent::BlockInvalid { reason, .. } if reason.reason == "bad-cb-amount"
    )));
    assert_eq!(harness.height(), 3);
}

#[test]
fn invalid_block_poisons_descendants_until_reconsidered() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    let chain = harness.mine_empty(5);

    let events = harness
        .state
        .invalidate_block(&chain[2].hash())
        .expect("invalidate");
    assert_eq!(events.len(), 3);
    assert_eq!(harness.tip(), chain[1].hash());
    assert!(harness.state.activate_best_chain().expect("activate").is_empty());

    let tree = harness.state.tree();
    for block in &chain[2..] {
        assert!(tree.node(tree.lookup(&block.hash()).expect("known")).is_failed());
    }

    // A sibling takes over while the original branch is failed.
    let sibling = harness.build(&harness.tip(), Vec::new(), Vec::new(), 7);
    harness.submit(&sibling).expect("submit");
    assert_eq!(harness.tip(), sibling.hash());

    harness
        .state
        .reconsider_block(&chain[2].hash())
        .expect("reconsider");
    harness.state.activate_best_chain().expect("activate");
    assert_eq!(harness.tip(), chain[4].hash());
    let coins = harness.state.coins();
    assert!(coins
        .coins(&sibling.transactions[0].txid())
        .expect("read")
        .is_none());

    // Failure flags live in the block index column.
    assert!(!harness
        .store
        .dump(Column::BlockIndex)
        .expect("dump")
        .is_empty());
}

#[test]
fn store_failure_aborts_activation_without_moving_the_tip() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    harness.mine_empty(3);
    let tip = harness.tip();
    let before = harness.ledger();

    let next = harness.build(&tip, Vec::new(), Vec::new(), 4);
    let now = harness.now();
    harness.state.accept_block(&next, now).expect("accept");

    harness.store.fail_writes(true);
    let err = harness
        .state
        .activate_best_chain()
        .expect_err("write must fail");
    assert!(err.is_system());
    harness.store.fail_writes(false);

    assert_eq!(harness.tip(), tip);
    assert_eq!(harness.state.coins().best_block().expect("best"), Some(tip));
    assert_eq!(harness.ledger(), before);
    let tree = harness.state.tree();
    assert!(!tree.node(tree.lookup(&next.hash()).expect("known")).is_failed());
}
