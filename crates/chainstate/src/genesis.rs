//! Genesis block construction.

use zend_consensus::constants::{
    BLOCK_VERSION_ORIGINAL, BLOCK_VERSION_SC_SUPPORT, TRANSPARENT_TX_VERSION,
};
use zend_consensus::ConsensusParams;
use zend_primitives::transaction::SEQUENCE_FINAL;
use zend_primitives::{Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut};

use crate::validation::coinbase_height_script;

const GENESIS_MESSAGE: &[u8] = b"zend genesis: sidechains from block zero";
const OP_RETURN: u8 = 0x6a;

/// The genesis block for `params`. It pays nothing; the subsidy starts at
/// height one.
pub fn genesis_block(params: &ConsensusParams) -> Block {
    let mut script_sig = coinbase_height_script(0);
    script_sig.push(GENESIS_MESSAGE.len() as u8);
    script_sig.extend_from_slice(GENESIS_MESSAGE);

    let coinbase = Transaction {
        version: TRANSPARENT_TX_VERSION,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: SEQUENCE_FINAL,
        }],
        vout: vec![TxOut {
            value: 0,
            script_pubkey: vec![OP_RETURN],
        }],
        vcsw_ccin: Vec::new(),
        vsc_ccout: Vec::new(),
        vft_ccout: Vec::new(),
        lock_time: 0,
        join_splits: Vec::new(),
    };

    let version = if params.sc_enabled_at(0) {
        BLOCK_VERSION_SC_SUPPORT
    } else {
        BLOCK_VERSION_ORIGINAL
    };
    let mut block = Block {
        header: BlockHeader {
            version,
            prev_block: [0u8; 32],
            merkle_root: [0u8; 32],
            sc_txs_commitment: [0u8; 32],
            time: params.genesis_time,
            bits: params.genesis_bits,
            nonce: [0u8; 32],
            solution: Vec::new(),
        },
        transactions: vec![coinbase],
        certificates: Vec::new(),
    };
    block.header.merkle_root = block.compute_merkle_root().0;
    block
}
