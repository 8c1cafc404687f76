mod common;

use common::{certificate, coinbase_out, create_sidechain, spend, Harness};
use zend_chainstate::delay::DelayPolicy;

#[test]
fn connected_entries_are_located_and_disconnect_forgets_them() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    let mined = harness.mine_empty(101);
    let (input, value) = coinbase_out(&mined[0]);
    let tx = spend(vec![input], vec![value - 1_000]);
    let block = harness.mine(vec![tx.clone()], Vec::new());

    let location = harness
        .state
        .tx_location(&tx.txid())
        .expect("lookup")
        .expect("indexed");
    assert_eq!(location.block_hash, block.hash());
    assert_eq!(location.index, 1);

    let stored = harness
        .state
        .read_block(&location.block_hash)
        .expect("read")
        .expect("stored block");
    assert_eq!(stored.transactions[location.index as usize].txid(), tx.txid());

    harness
        .state
        .invalidate_block(&block.hash())
        .expect("invalidate");
    assert_eq!(harness.state.tx_location(&tx.txid()).expect("lookup"), None);
}

#[test]
fn certificates_are_indexed_after_transactions() {
    let mut harness = Harness::new(DelayPolicy::disabled());
    let mined = harness.mine_empty(101);
    let (creation, sc_id) = create_sidechain(coinbase_out(&mined[0]), 10, 5_000_000);
    harness.mine(vec![creation], Vec::new());
    harness.mine_empty(9);
    let end_hash = harness.state.block_hash(111).expect("end of epoch");
    let cert = certificate(sc_id, 0, 1, end_hash, &[1_000]);
    let block = harness.mine(Vec::new(), vec![cert.clone()]);

    let location = harness
        .state
        .tx_location(&cert.hash())
        .expect("lookup")
        .expect("indexed");
    assert_eq!(location.block_hash, block.hash());
    // Coinbase first, then the certificate.
    assert_eq!(location.index, 1);
}
