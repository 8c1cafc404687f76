//! Block header and block types.

use zend_consensus::constants::BLOCK_VERSION_SC_SUPPORT;
use zend_consensus::Hash256;

use crate::certificate::ScCertificate;
use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{merkle_root, sha256d};
use crate::transaction::Transaction;

/// Size of the serialized header without the equihash solution.
pub const HEADER_PREFIX_LEN: usize = 4 + 32 + 32 + 32 + 4 + 4 + 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    /// Commitment over the block's sidechain-related contributions; zero for
    /// versions that cannot carry certificates.
    pub sc_txs_commitment: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: Hash256,
    pub solution: Vec<u8>,
}

impl BlockHeader {
    pub fn supports_certificates(&self) -> bool {
        self.version == BLOCK_VERSION_SC_SUPPORT
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        encode(self)
    }

    /// Header bytes the equihash solution commits to.
    pub fn equihash_input(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_hash_le(&self.sc_txs_commitment);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_hash_le(&self.sc_txs_commitment);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_hash_le(&self.nonce);
        encoder.write_var_bytes(&self.solution);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash_le()?,
            merkle_root: decoder.read_hash_le()?,
            sc_txs_commitment: decoder.read_hash_le()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_hash_le()?,
            solution: decoder.read_var_bytes()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Only serialized when the header version supports certificates.
    pub certificates: Vec<ScCertificate>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    pub fn serialized_size(&self) -> usize {
        self.consensus_encode().len()
    }

    /// Leaves are transaction ids followed by certificate hashes.
    pub fn merkle_leaves(&self) -> Vec<Hash256> {
        self.transactions
            .iter()
            .map(Transaction::txid)
            .chain(self.certificates.iter().map(ScCertificate::hash))
            .collect()
    }

    /// Recomputed merkle root and whether the tree was malleated.
    pub fn compute_merkle_root(&self) -> (Hash256, bool) {
        merkle_root(&self.merkle_leaves())
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        Encodable::consensus_encode(&self.header, encoder);
        encoder.write_list(&self.transactions);
        if self.header.supports_certificates() {
            encoder.write_list(&self.certificates);
        }
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = <BlockHeader as Decodable>::consensus_decode(decoder)?;
        let transactions = decoder.read_list()?;
        let certificates = if header.supports_certificates() {
            decoder.read_list()?
        } else {
            Vec::new()
        };
        Ok(Self {
            header,
            transactions,
            certificates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outpoint::OutPoint;
    use crate::transaction::{TxIn, TxOut};

    fn coinbase() -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: vec![0x01, 0x01],
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value: 50,
                script_pubkey: vec![0x51],
            }],
            vcsw_ccin: Vec::new(),
            vsc_ccout: Vec::new(),
            vft_ccout: Vec::new(),
            lock_time: 0,
            join_splits: Vec::new(),
        }
    }

    fn header(version: i32) -> BlockHeader {
        BlockHeader {
            version,
            prev_block: [1u8; 32],
            merkle_root: [2u8; 32],
            sc_txs_commitment: [0u8; 32],
            time: 1_600_000_000,
            bits: 0x200f_0f0f,
            nonce: [3u8; 32],
            solution: vec![4u8; 36],
        }
    }

    #[test]
    fn header_prefix_length() {
        let header = header(4);
        assert_eq!(header.equihash_input().len() + 32, HEADER_PREFIX_LEN);
        assert_eq!(
            BlockHeader::consensus_decode(&header.consensus_encode()),
            Ok(header)
        );
    }

    #[test]
    fn certificates_only_in_sc_blocks() {
        let block = Block {
            header: header(4),
            transactions: vec![coinbase()],
            certificates: Vec::new(),
        };
        let with_slot = Block {
            header: header(BLOCK_VERSION_SC_SUPPORT),
            ..block.clone()
        };
        assert_eq!(with_slot.serialized_size(), block.serialized_size() + 1);
        assert_eq!(Block::consensus_decode(&with_slot.consensus_encode()), Ok(with_slot));
    }

    #[test]
    fn merkle_root_single_tx_is_txid() {
        let block = Block {
            header: header(4),
            transactions: vec![coinbase()],
            certificates: Vec::new(),
        };
        let (root, mutated) = block.compute_merkle_root();
        assert_eq!(root, block.transactions[0].txid());
        assert!(!mutated);
    }
}
