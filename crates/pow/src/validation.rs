use primitive_types::U256;
use zend_consensus::ConsensusParams;
use zend_primitives::block::BlockHeader;

use crate::difficulty::{compact_to_u256, CompactError};
use crate::equihash::{self, EquihashError};

#[derive(Debug)]
pub enum PowError {
    InvalidBits(&'static str),
    HashMismatch,
    Equihash(EquihashError),
    Compact(CompactError),
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::InvalidBits(message) => write!(f, "{message}"),
            PowError::HashMismatch => write!(f, "pow hash does not meet target"),
            PowError::Equihash(err) => write!(f, "{err}"),
            PowError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<EquihashError> for PowError {
    fn from(err: EquihashError) -> Self {
        PowError::Equihash(err)
    }
}

impl From<CompactError> for PowError {
    fn from(err: CompactError) -> Self {
        PowError::Compact(err)
    }
}

/// Target bound check only: bits decode to a non-zero target under the
/// limit and the header hash meets it.
pub fn check_proof_of_work(header: &BlockHeader, params: &ConsensusParams) -> Result<(), PowError> {
    let target = compact_to_u256(header.bits)?;
    if target.is_zero() {
        return Err(PowError::InvalidBits("pow target is zero"));
    }

    let pow_limit = U256::from_little_endian(&params.pow_limit);
    if target > pow_limit {
        return Err(PowError::InvalidBits("pow target above limit"));
    }

    let hash_value = U256::from_little_endian(&header.hash());
    if hash_value > target {
        return Err(PowError::HashMismatch);
    }
    Ok(())
}

pub fn validate_pow_header(header: &BlockHeader, params: &ConsensusParams) -> Result<(), PowError> {
    equihash::validate_equihash_solution(header, params)?;
    check_proof_of_work(header, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zend_consensus::params::{consensus_params, Network};

    #[test]
    fn target_above_limit_rejected() {
        let params = consensus_params(Network::Regtest);
        let mut header = BlockHeader {
            version: 4,
            prev_block: [0u8; 32],
            merkle_root: [0u8; 32],
            sc_txs_commitment: [0u8; 32],
            time: 0,
            bits: 0x207f_ffff,
            nonce: [0u8; 32],
            solution: Vec::new(),
        };
        assert!(matches!(
            check_proof_of_work(&header, &params),
            Err(PowError::InvalidBits(_))
        ));
        header.bits = 0;
        assert!(matches!(
            check_proof_of_work(&header, &params),
            Err(PowError::InvalidBits(_))
        ));
    }

    #[test]
    fn grinding_the_nonce_finds_a_regtest_hash() {
        let params = consensus_params(Network::Regtest);
        let mut header = BlockHeader {
            version: 4,
            prev_block: [0u8; 32],
            merkle_root: [0u8; 32],
            sc_txs_commitment: [0u8; 32],
            time: 0,
            bits: params.genesis_bits,
            nonce: [0u8; 32],
            solution: Vec::new(),
        };
        let mut found = false;
        for nonce in 0u32..1_000 {
            header.nonce[..4].copy_from_slice(&nonce.to_le_bytes());
            if check_proof_of_work(&header, &params).is_ok() {
                found = true;
                break;
            }
        }
        assert!(found);
    }
}
