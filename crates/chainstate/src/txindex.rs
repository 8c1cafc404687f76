//! Optional transaction and certificate location index.

use zend_consensus::Hash256;
use zend_primitives::encoding::{DecodeError, Decoder, Encoder};
use zend_primitives::Block;
use zend_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::flatfiles::FileLocation;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxLocation {
    pub block_hash: Hash256,
    pub block: FileLocation,
    /// Position among the block's transactions followed by its certificates.
    pub index: u32,
}

impl TxLocation {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bytes(&self.block_hash);
        self.block.encode_into(&mut encoder);
        encoder.write_u32_le(self.index);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let block_hash = decoder.read_fixed::<32>()?;
        let block = FileLocation::decode_from(&mut decoder)?;
        let index = decoder.read_u32_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            block_hash,
            block,
            index,
        })
    }
}

pub struct TxIndex<S> {
    store: S,
}

impl<S> TxIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

fn entry_ids(block: &Block) -> impl Iterator<Item = Hash256> + '_ {
    block
        .transactions
        .iter()
        .map(|tx| tx.txid())
        .chain(block.certificates.iter().map(|cert| cert.hash()))
}

impl<S: KeyValueStore> TxIndex<S> {
    pub fn insert_block(&self, batch: &mut WriteBatch, block: &Block, location: FileLocation) {
        let block_hash = block.hash();
        for (index, id) in entry_ids(block).enumerate() {
            let entry = TxLocation {
                block_hash,
                block: location,
                index: index as u32,
            };
            batch.put(Column::TxIndex, id, entry.encode());
        }
    }

    pub fn remove_block(&self, batch: &mut WriteBatch, block: &Block) {
        for id in entry_ids(block) {
            batch.delete(Column::TxIndex, id);
        }
    }

    pub fn get(&self, id: &Hash256) -> Result<Option<TxLocation>, StoreError> {
        match self.store.get(Column::TxIndex, id)? {
            Some(bytes) => TxLocation::decode(&bytes)
                .map(Some)
                .map_err(|_| StoreError::Corrupt("tx index entry")),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_encoding_is_strict() {
        let location = TxLocation {
            block_hash: [7u8; 32],
            block: FileLocation {
                file_id: 2,
                offset: 4096,
                len: 311,
            },
            index: 3,
        };
        let mut bytes = location.encode();
        assert_eq!(TxLocation::decode(&bytes), Ok(location));
        bytes.push(0);
        assert!(TxLocation::decode(&bytes).is_err());
    }
}
