mod common;

use common::{certificate, coinbase_out, spend, Node};
use zend_chainstate::ChainEvent;

fn connected(events: &[ChainEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ChainEvent::BlockConnected { .. }))
        .count()
}

fn disconnected(events: &[ChainEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ChainEvent::BlockDisconnected { .. }))
        .count()
}

#[test]
fn reorg_returns_disconnected_transactions_to_the_pool() {
    let node = Node::new();
    let mined = node.mine_empty(101);
    let fork_base = node.tip();
    let (input, value) = coinbase_out(&mined[0]);
    let tx = spend(vec![input], vec![value - 1_000]);
    let txid = tx.txid();
    node.mine(vec![tx], Vec::new());
    assert!(!node.in_pool(&txid));

    let first = node.build(&fork_base, Vec::new(), Vec::new(), 1);
    let report = node.submit(&first);
    assert!(report.events.is_empty(), "equal work must not reorg");

    let second = node.build(&first.hash(), Vec::new(), Vec::new(), 1);
    let report = node.submit(&second);
    assert_eq!(node.tip(), second.hash());
    assert_eq!(disconnected(&report.events), 1);
    assert_eq!(connected(&report.events), 2);
    assert_eq!(report.resurrected, vec![txid]);
    assert!(node.in_pool(&txid));
}

#[test]
fn invalidate_and_reconsider_move_entries_in_and_out() {
    let node = Node::new();
    let mined = node.mine_empty(101);
    let parent = node.tip();
    let (input, value) = coinbase_out(&mined[0]);
    let tx = spend(vec![input], vec![value - 1_000]);
    let txid = tx.txid();
    let (block, _) = node.mine(vec![tx], Vec::new());

    let report = node.ctx.invalidate_block(&block.hash()).expect("invalidate");
    assert_eq!(node.tip(), parent);
    assert_eq!(disconnected(&report.events), 1);
    assert!(node.in_pool(&txid));

    let report = node.ctx.reconsider_block(&block.hash()).expect("reconsider");
    assert_eq!(node.tip(), block.hash());
    assert_eq!(connected(&report.events), 1);
    assert!(report.removed.contains(&txid));
    assert!(!node.in_pool(&txid));
}

#[test]
fn certificates_leave_when_their_epoch_end_is_disconnected() {
    let (node, sc_id) = Node::with_sidechain(111, None);
    let end_hash = node.block_hash(111);
    let cert = certificate(sc_id, 0, 1, end_hash, &[1_000]);
    node.admit_cert(cert.clone()).expect("certificate");

    let report = node.ctx.invalidate_block(&end_hash).expect("invalidate");
    assert_eq!(node.height(), 110);
    assert!(report.removed.contains(&cert.hash()));
    assert!(!node.in_pool(&cert.hash()));
}

#[test]
fn long_reorg_finishes_across_bounded_steps() {
    let node = Node::new();
    let genesis = node.tip();
    node.mine_empty(35);

    let mut prev = genesis;
    let mut last = None;
    let mut events = Vec::new();
    for _ in 0..36 {
        let block = node.build(&prev, Vec::new(), Vec::new(), 2);
        prev = block.hash();
        events.extend(node.submit(&block).events);
        last = Some(block);
    }

    let last = last.expect("fork blocks");
    assert_eq!(node.tip(), last.hash());
    assert_eq!(node.height(), 36);
    assert_eq!(disconnected(&events), 35);
    assert_eq!(connected(&events), 36);
}
