//! Transaction types and serialization.
//!
//! Sidechain transactions (`SC_TX_VERSION`) carry three extra vectors after
//! the transparent outputs: ceased sidechain withdrawal inputs, sidechain
//! creation outputs and forward transfer outputs. Shielded joinsplits only
//! appear in the PHGR and Groth versions.

use zend_consensus::constants::{GROTH_TX_VERSION, PHGR_TX_VERSION, SC_TX_VERSION};
use zend_consensus::money::Amount;
use zend_consensus::Hash256;

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

pub const SEQUENCE_FINAL: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            prevout: OutPoint::consensus_decode(decoder)?,
            script_sig: decoder.read_var_bytes()?,
            sequence: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            value: decoder.read_i64_le()?,
            script_pubkey: decoder.read_var_bytes()?,
        })
    }
}

/// Registers a new sidechain; its id is derived from the creating txid and
/// the output position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScCreationOutput {
    pub withdrawal_epoch_length: i32,
    pub value: Amount,
    pub address: Hash256,
    pub custom_data: Vec<u8>,
    pub wcert_vk: Vec<u8>,
}

impl Encodable for ScCreationOutput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.withdrawal_epoch_length);
        encoder.write_i64_le(self.value);
        encoder.write_hash_le(&self.address);
        encoder.write_var_bytes(&self.custom_data);
        encoder.write_var_bytes(&self.wcert_vk);
    }
}

impl Decodable for ScCreationOutput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            withdrawal_epoch_length: decoder.read_i32_le()?,
            value: decoder.read_i64_le()?,
            address: decoder.read_hash_le()?,
            custom_data: decoder.read_var_bytes()?,
            wcert_vk: decoder.read_var_bytes()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardTransferOutput {
    pub sc_id: Hash256,
    pub value: Amount,
    pub address: Hash256,
}

impl Encodable for ForwardTransferOutput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.sc_id);
        encoder.write_i64_le(self.value);
        encoder.write_hash_le(&self.address);
    }
}

impl Decodable for ForwardTransferOutput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            sc_id: decoder.read_hash_le()?,
            value: decoder.read_i64_le()?,
            address: decoder.read_hash_le()?,
        })
    }
}

/// Withdrawal from a ceased sidechain, authorized by a proof and made
/// unique by its nullifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CswInput {
    pub sc_id: Hash256,
    pub value: Amount,
    pub nullifier: Hash256,
    pub pub_key_hash: [u8; 20],
    pub proof: Vec<u8>,
    pub redeem_script: Vec<u8>,
}

impl CswInput {
    /// P2PKH script the withdrawn amount is bound to.
    pub fn script_pubkey(&self) -> Vec<u8> {
        p2pkh_script(&self.pub_key_hash)
    }
}

impl Encodable for CswInput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.sc_id);
        encoder.write_i64_le(self.value);
        encoder.write_hash_le(&self.nullifier);
        encoder.write_bytes(&self.pub_key_hash);
        encoder.write_var_bytes(&self.proof);
        encoder.write_var_bytes(&self.redeem_script);
    }
}

impl Decodable for CswInput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            sc_id: decoder.read_hash_le()?,
            value: decoder.read_i64_le()?,
            nullifier: decoder.read_hash_le()?,
            pub_key_hash: decoder.read_fixed::<20>()?,
            proof: decoder.read_var_bytes()?,
            redeem_script: decoder.read_var_bytes()?,
        })
    }
}

/// Shielded value transfer: moves `vpub_old` into and `vpub_new` out of the
/// shielded pool, spending two notes and creating two.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinSplit {
    pub vpub_old: Amount,
    pub vpub_new: Amount,
    pub anchor: Hash256,
    pub nullifiers: [Hash256; 2],
    pub commitments: [Hash256; 2],
    pub proof: Vec<u8>,
}

impl Encodable for JoinSplit {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.vpub_old);
        encoder.write_i64_le(self.vpub_new);
        encoder.write_hash_le(&self.anchor);
        for nullifier in &self.nullifiers {
            encoder.write_hash_le(nullifier);
        }
        for commitment in &self.commitments {
            encoder.write_hash_le(commitment);
        }
        encoder.write_var_bytes(&self.proof);
    }
}

impl Decodable for JoinSplit {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            vpub_old: decoder.read_i64_le()?,
            vpub_new: decoder.read_i64_le()?,
            anchor: decoder.read_hash_le()?,
            nullifiers: [decoder.read_hash_le()?, decoder.read_hash_le()?],
            commitments: [decoder.read_hash_le()?, decoder.read_hash_le()?],
            proof: decoder.read_var_bytes()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub vcsw_ccin: Vec<CswInput>,
    pub vsc_ccout: Vec<ScCreationOutput>,
    pub vft_ccout: Vec<ForwardTransferOutput>,
    pub lock_time: u32,
    pub join_splits: Vec<JoinSplit>,
}

impl Transaction {
    pub fn is_sc_version(&self) -> bool {
        self.version == SC_TX_VERSION
    }

    pub fn supports_join_splits(&self) -> bool {
        self.version >= PHGR_TX_VERSION || self.version == GROTH_TX_VERSION
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
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

    /// Sidechain id assigned to the creation output at `index`.
    pub fn sc_id_for_creation(&self, txid: &Hash256, index: usize) -> Hash256 {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(txid);
        buf.extend_from_slice(&(index as u32).to_le_bytes());
        sha256d(&buf)
    }

    pub fn has_cross_chain_outputs(&self) -> bool {
        !self.vsc_ccout.is_empty() || !self.vft_ccout.is_empty()
    }

    /// Value leaving the transparent pool: outputs, sidechain creations,
    /// forward transfers and value moved into joinsplits. `None` on overflow.
    pub fn value_out(&self) -> Option<Amount> {
        let transparent = self.vout.iter().map(|out| out.value);
        let creations = self.vsc_ccout.iter().map(|out| out.value);
        let transfers = self.vft_ccout.iter().map(|out| out.value);
        let shielded = self.join_splits.iter().map(|js| js.vpub_old);
        transparent
            .chain(creations)
            .chain(transfers)
            .chain(shielded)
            .try_fold(0i64, |acc, value| acc.checked_add(value))
    }

    /// Value entering the transparent pool from joinsplits and withdrawals.
    pub fn value_in_without_inputs(&self) -> Option<Amount> {
        let shielded = self.join_splits.iter().map(|js| js.vpub_new);
        let withdrawals = self.vcsw_ccin.iter().map(|csw| csw.value);
        shielded
            .chain(withdrawals)
            .try_fold(0i64, |acc, value| acc.checked_add(value))
    }

    pub fn nullifiers(&self) -> impl Iterator<Item = &Hash256> {
        self.join_splits.iter().flat_map(|js| js.nullifiers.iter())
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_list(&self.vin);
        encoder.write_list(&self.vout);
        if self.is_sc_version() {
            encoder.write_list(&self.vcsw_ccin);
            encoder.write_list(&self.vsc_ccout);
            encoder.write_list(&self.vft_ccout);
        }
        encoder.write_u32_le(self.lock_time);
        if self.supports_join_splits() {
            encoder.write_list(&self.join_splits);
        }
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let vin = decoder.read_list()?;
        let vout = decoder.read_list()?;
        let (vcsw_ccin, vsc_ccout, vft_ccout) = if version == SC_TX_VERSION {
            (
                decoder.read_list()?,
                decoder.read_list()?,
                decoder.read_list()?,
            )
        } else {
            (Vec::new(), Vec::new(), Vec::new())
        };
        let lock_time = decoder.read_u32_le()?;
        let join_splits = if version >= PHGR_TX_VERSION || version == GROTH_TX_VERSION {
            decoder.read_list()?
        } else {
            Vec::new()
        };
        Ok(Self {
            version,
            vin,
            vout,
            vcsw_ccin,
            vsc_ccout,
            vft_ccout,
            lock_time,
            join_splits,
        })
    }
}

pub fn p2pkh_script(pub_key_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(pub_key_hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sc_tx() -> Transaction {
        Transaction {
            version: SC_TX_VERSION,
            vin: vec![TxIn {
                prevout: OutPoint::new([7u8; 32], 1),
                script_sig: vec![0x51],
                sequence: SEQUENCE_FINAL,
            }],
            vout: vec![TxOut {
                value: 40,
                script_pubkey: p2pkh_script(&[1u8; 20]),
            }],
            vcsw_ccin: Vec::new(),
            vsc_ccout: vec![ScCreationOutput {
                withdrawal_epoch_length: 10,
                value: 5,
                address: [2u8; 32],
                custom_data: vec![1, 2, 3],
                wcert_vk: vec![9; 4],
            }],
            vft_ccout: vec![ForwardTransferOutput {
                sc_id: [3u8; 32],
                value: 7,
                address: [4u8; 32],
            }],
            lock_time: 0,
            join_splits: Vec::new(),
        }
    }

    #[test]
    fn sc_vectors_only_serialized_for_sc_version() {
        let tx = sc_tx();
        let decoded = Transaction::consensus_decode(&tx.consensus_encode()).expect("decode");
        assert_eq!(decoded, tx);

        let mut plain = tx.clone();
        plain.version = 1;
        let decoded = Transaction::consensus_decode(&plain.consensus_encode()).expect("decode");
        assert!(decoded.vsc_ccout.is_empty());
        assert!(decoded.vft_ccout.is_empty());
        assert_ne!(plain.txid(), tx.txid());
    }

    #[test]
    fn value_out_counts_cross_chain_outputs() {
        let tx = sc_tx();
        assert_eq!(tx.value_out(), Some(52));
        let mut overflow = tx;
        overflow.vout[0].value = i64::MAX;
        assert_eq!(overflow.value_out(), None);
    }

    #[test]
    fn creation_ids_differ_per_index() {
        let tx = sc_tx();
        let txid = tx.txid();
        assert_ne!(tx.sc_id_for_creation(&txid, 0), tx.sc_id_for_creation(&txid, 1));
    }
}
