//! Sidechain transactions commitment carried in block headers.
//!
//! Every sidechain touched by a block contributes one leaf built from the
//! merkle roots of its creations, forward transfers, ceased withdrawals and
//! certificates. Leaves are ordered by sidechain id. A block with no
//! sidechain content commits to the all-zero root.

use std::collections::BTreeMap;

use zend_consensus::Hash256;
use zend_primitives::hash::merkle_root;
use zend_primitives::{sha256d, Block};

#[derive(Default)]
struct ScLeaf {
    creations: Vec<Hash256>,
    transfers: Vec<Hash256>,
    withdrawals: Vec<Hash256>,
    certificates: Vec<Hash256>,
}

impl ScLeaf {
    fn hash(&self, sc_id: &Hash256) -> Hash256 {
        let mut buf = Vec::with_capacity(32 * 5);
        buf.extend_from_slice(sc_id);
        for part in [
            &self.creations,
            &self.transfers,
            &self.withdrawals,
            &self.certificates,
        ] {
            buf.extend_from_slice(&merkle_root(part).0);
        }
        sha256d(&buf)
    }
}

fn output_id(txid: &Hash256, index: usize) -> Hash256 {
    let mut buf = [0u8; 36];
    buf[..32].copy_from_slice(txid);
    buf[32..].copy_from_slice(&(index as u32).to_le_bytes());
    sha256d(&buf)
}

pub fn sc_txs_commitment(block: &Block) -> Hash256 {
    let mut leaves: BTreeMap<Hash256, ScLeaf> = BTreeMap::new();
    for tx in &block.transactions {
        if tx.vsc_ccout.is_empty() && tx.vft_ccout.is_empty() && tx.vcsw_ccin.is_empty() {
            continue;
        }
        let txid = tx.txid();
        for index in 0..tx.vsc_ccout.len() {
            let sc_id = tx.sc_id_for_creation(&txid, index);
            leaves
                .entry(sc_id)
                .or_default()
                .creations
                .push(output_id(&txid, index));
        }
        for (index, ft) in tx.vft_ccout.iter().enumerate() {
            leaves
                .entry(ft.sc_id)
                .or_default()
                .transfers
                .push(output_id(&txid, index));
        }
        for (index, csw) in tx.vcsw_ccin.iter().enumerate() {
            leaves
                .entry(csw.sc_id)
                .or_default()
                .withdrawals
                .push(output_id(&txid, index));
        }
    }
    for cert in &block.certificates {
        leaves
            .entry(cert.sc_id)
            .or_default()
            .certificates
            .push(cert.hash());
    }

    if leaves.is_empty() {
        return [0u8; 32];
    }
    let hashes: Vec<Hash256> = leaves
        .iter()
        .map(|(sc_id, leaf)| leaf.hash(sc_id))
        .collect();
    merkle_root(&hashes).0
}
