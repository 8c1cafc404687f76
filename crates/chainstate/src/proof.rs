//! Zero-knowledge proof verification seam.
//!
//! The chain state collects one [`ProofContext`] per certificate, ceased
//! sidechain withdrawal and joinsplit while connecting a block and hands the
//! whole set to a [`ProofVerifier`] once the cheaper checks passed.

use zend_consensus::money::Amount;
use zend_consensus::Hash256;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProofContext {
    Certificate {
        id: Hash256,
        sc_id: Hash256,
        epoch_number: i32,
        quality: i64,
        end_epoch_block_hash: Hash256,
        prev_end_epoch_block_hash: Hash256,
        bwt_total: Amount,
        vk: Vec<u8>,
        proof: Vec<u8>,
    },
    Csw {
        txid: Hash256,
        sc_id: Hash256,
        value: Amount,
        nullifier: Hash256,
        pub_key_hash: [u8; 20],
        proof: Vec<u8>,
    },
    JoinSplit {
        txid: Hash256,
        index: usize,
        anchor: Hash256,
        proof: Vec<u8>,
    },
}

impl ProofContext {
    /// Transaction or certificate the proof belongs to.
    pub fn owner(&self) -> Hash256 {
        match self {
            ProofContext::Certificate { id, .. } => *id,
            ProofContext::Csw { txid, .. } | ProofContext::JoinSplit { txid, .. } => *txid,
        }
    }
}

pub trait ProofVerifier: Send + Sync {
    fn verify(&self, context: &ProofContext) -> bool;

    /// Verifies a set of proofs; returns the owner of the first failing one.
    fn batch_verify(&self, contexts: &[ProofContext]) -> Result<(), Hash256> {
        for context in contexts {
            if !self.verify(context) {
                return Err(context.owner());
            }
        }
        Ok(())
    }
}

/// Accepts every proof. Used until a real proving system backend is wired in.
#[derive(Debug)]
pub struct TrustingVerifier;

impl TrustingVerifier {
    pub fn new() -> Self {
        zend_log::log_warn!("proof verification is disabled; sidechain proofs are trusted");
        Self
    }
}

impl Default for TrustingVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofVerifier for TrustingVerifier {
    fn verify(&self, _context: &ProofContext) -> bool {
        true
    }
}
