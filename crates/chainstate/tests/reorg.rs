mod common;

use common::{coinbase_out, create_sidechain, spend, Harness};
use zend_chainstate::delay::DelayPolicy;
use zend_chainstate::view::CoinSource;
use zend_chainstate::ChainEvent;
use zend_primitives::OutPoint;

fn summarize(events: &[ChainEvent]) -> Vec<(char, i32)> {
    events
        .iter()
        .filter_map(|event| match event {
            ChainEvent::BlockConnected { height, .. } => Some(('+', *height)),
            ChainEvent::BlockDisconnected { height, .. } => Some(('-', *height)),
            _ => None,
        })
        .collect()
}

#[test]
fn more_work_fork_replaces_active_chain() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    let genesis = harness.genesis_hash();
    let chain_a = harness.mine_empty(5);
    let chain_b = harness.extend(&genesis, 6, 2);
    assert_eq!(harness.tip(), chain_a[4].hash());

    let events = harness.state.activate_best_chain().expect("activate");
    assert_eq!(
        summarize(&events),
        vec![
            ('-', 5),
            ('-', 4),
            ('-', 3),
            ('-', 2),
            ('-', 1),
            ('+', 1),
            ('+', 2),
            ('+', 3),
            ('+', 4),
            ('+', 5),
            ('+', 6),
        ]
    );
    assert_eq!(harness.tip(), chain_b[5].hash());

    let coins = harness.state.coins();
    for block in &chain_a {
        let txid = block.transactions[0].txid();
        assert!(coins.coins(&txid).expect("read").is_none());
        assert!(harness.state.tx_location(&txid).expect("index").is_none());
    }
    for block in &chain_b {
        let txid = block.transactions[0].txid();
        assert!(coins.coins(&txid).expect("read").is_some());
        let location = harness
            .state
            .tx_location(&txid)
            .expect("index")
            .expect("indexed");
        assert_eq!(location.block_hash, block.hash());
        assert_eq!(location.index, 0);
    }
    let genesis_cb = harness
        .state
        .read_block(&genesis)
        .expect("read")
        .expect("genesis")
        .transactions[0]
        .txid();
    assert!(coins.coins(&genesis_cb).expect("read").is_some());
}

#[test]
fn late_fork_is_delayed_until_it_pays_back() {
    let mut harness = Harness::new(DelayPolicy::default());
    let chain_a = harness.mine_empty(10);
    let active_tip = chain_a[9].hash();

    // Forks off height 2 while the tip is at 10; more work but penalised.
    let fork = harness.extend(&chain_a[1].hash(), 10, 3);
    let events = harness.state.activate_best_chain().expect("activate");
    assert!(events.is_empty());
    assert_eq!(harness.tip(), active_tip);
    assert_eq!(harness.state.best_header_hash(), Some(fork[9].hash()));

    let tree = harness.state.tree();
    let fork_tip = tree.node(tree.lookup(&fork[9].hash()).expect("fork tip"));
    assert_eq!(fork_tip.chain_delay, 26);
    assert!(!fork_tip.is_failed());

    // Every block past the active height pays back one unit of delay.
    let longer = harness.extend(&fork[9].hash(), 26, 3);
    let tree = harness.state.tree();
    let last = tree.node(tree.lookup(&longer[25].hash()).expect("last"));
    assert_eq!(last.height, 38);
    assert_eq!(last.chain_delay, 0);

    let events = harness.state.activate_best_chain().expect("activate");
    let summary = summarize(&events);
    let disconnected: Vec<i32> = summary
        .iter()
        .filter(|(kind, _)| *kind == '-')
        .map(|(_, height)| *height)
        .collect();
    assert_eq!(disconnected, (3..=10).rev().collect::<Vec<_>>());
    let connected = summary.iter().filter(|(kind, _)| *kind == '+').count();
    assert_eq!(connected, 36);
    assert_eq!(harness.tip(), longer[25].hash());
}

#[test]
fn fork_choice_ignores_arrival_order_of_unequal_forks() {
    let mut first = Harness::new(DelayPolicy::disabled());
    let mut second = Harness::new(DelayPolicy::disabled());
    let genesis = first.genesis_hash();

    let short = first.extend(&genesis, 3, 1);
    let long = first.extend(&genesis, 4, 2);
    second.extend(&genesis, 4, 2);
    second.extend(&genesis, 3, 1);

    first.state.activate_best_chain().expect("activate");
    second.state.activate_best_chain().expect("activate");
    assert_eq!(first.tip(), long[3].hash());
    assert_eq!(second.tip(), long[3].hash());
    assert_ne!(first.tip(), short[2].hash());

    assert!(first.state.activate_best_chain().expect("again").is_empty());
    assert!(second.state.activate_best_chain().expect("again").is_empty());
}

#[test]
fn equal_work_keeps_the_first_arrival() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    let genesis = harness.genesis_hash();
    let first = harness.extend(&genesis, 2, 1);
    harness.extend(&genesis, 2, 2);
    harness.state.activate_best_chain().expect("activate");
    assert_eq!(harness.tip(), first[1].hash());
}

#[test]
fn disconnect_and_reconnect_reproduce_the_ledger() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    let mined = harness.mine_empty(101);
    let before = harness.ledger();
    let tip_before = harness.tip();

    let (input, value) = coinbase_out(&mined[0]);
    let split = spend(vec![input], vec![value / 2, value / 2 - 1_000]);
    let (creation, sc_id) = create_sidechain(coinbase_out(&mined[1]), 10, 5_000_000);
    let first = harness.mine(vec![split.clone(), creation], Vec::new());
    let chained = spend(vec![OutPoint::new(split.txid(), 0)], vec![value / 2 - 2_000]);
    harness.mine(vec![chained], Vec::new());
    harness.mine_empty(2);
    let after = harness.ledger();
    let tip_after = harness.tip();
    let record = harness
        .state
        .coins()
        .sidechain(&sc_id)
        .expect("read")
        .expect("sidechain");
    assert_eq!(record.balance, 5_000_000);

    let events = harness
        .state
        .invalidate_block(&first.hash())
        .expect("invalidate");
    assert_eq!(summarize(&events), vec![('-', 105), ('-', 104), ('-', 103), ('-', 102)]);
    assert_eq!(harness.tip(), tip_before);
    assert_eq!(harness.ledger(), before);
    assert!(harness.state.activate_best_chain().expect("activate").is_empty());

    harness
        .state
        .reconsider_block(&first.hash())
        .expect("reconsider");
    let events = harness.state.activate_best_chain().expect("activate");
    assert_eq!(summarize(&events).len(), 4);
    assert_eq!(harness.tip(), tip_after);
    assert_eq!(harness.ledger(), after);
}
