//! Sidechain withdrawal certificates.

use zend_consensus::constants::SC_CERT_VERSION;
use zend_consensus::money::Amount;
use zend_consensus::Hash256;

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::transaction::{p2pkh_script, TxIn, TxOut};

/// Payment from the sidechain balance back to a mainchain P2PKH address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackwardTransfer {
    pub amount: Amount,
    pub pub_key_hash: [u8; 20],
}

impl BackwardTransfer {
    pub fn to_tx_out(&self) -> TxOut {
        TxOut {
            value: self.amount,
            script_pubkey: p2pkh_script(&self.pub_key_hash),
        }
    }
}

impl Encodable for BackwardTransfer {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.amount);
        encoder.write_bytes(&self.pub_key_hash);
    }
}

impl Decodable for BackwardTransfer {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            amount: decoder.read_i64_le()?,
            pub_key_hash: decoder.read_fixed::<20>()?,
        })
    }
}

/// Certificate for one withdrawal epoch of a sidechain.
///
/// `vin`/`vout` pay the fee and change like a regular transaction. The
/// backward transfers are appended after the change outputs when the
/// certificate lands in the coin set, so `first_bwt_pos` equals
/// `vout.len()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScCertificate {
    pub version: i32,
    pub sc_id: Hash256,
    pub epoch_number: i32,
    pub quality: i64,
    pub end_epoch_block_hash: Hash256,
    pub sc_proof: Vec<u8>,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub backward_transfers: Vec<BackwardTransfer>,
}

impl ScCertificate {
    pub fn hash(&self) -> Hash256 {
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

    pub fn first_bwt_pos(&self) -> usize {
        self.vout.len()
    }

    /// Change outputs followed by backward transfers, the layout stored in
    /// the coin set.
    pub fn all_outputs(&self) -> Vec<TxOut> {
        self.vout
            .iter()
            .cloned()
            .chain(self.backward_transfers.iter().map(BackwardTransfer::to_tx_out))
            .collect()
    }

    pub fn bwt_total(&self) -> Option<Amount> {
        self.backward_transfers
            .iter()
            .try_fold(0i64, |acc, bt| acc.checked_add(bt.amount))
    }

    pub fn change_total(&self) -> Option<Amount> {
        self.vout
            .iter()
            .try_fold(0i64, |acc, out| acc.checked_add(out.value))
    }
}

impl Encodable for ScCertificate {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.sc_id);
        encoder.write_i32_le(self.epoch_number);
        encoder.write_i64_le(self.quality);
        encoder.write_hash_le(&self.end_epoch_block_hash);
        encoder.write_var_bytes(&self.sc_proof);
        encoder.write_list(&self.vin);
        encoder.write_list(&self.vout);
        encoder.write_list(&self.backward_transfers);
    }
}

impl Decodable for ScCertificate {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        if version != SC_CERT_VERSION {
            return Err(DecodeError::InvalidData("unexpected certificate version"));
        }
        Ok(Self {
            version,
            sc_id: decoder.read_hash_le()?,
            epoch_number: decoder.read_i32_le()?,
            quality: decoder.read_i64_le()?,
            end_epoch_block_hash: decoder.read_hash_le()?,
            sc_proof: decoder.read_var_bytes()?,
            vin: decoder.read_list()?,
            vout: decoder.read_list()?,
            backward_transfers: decoder.read_list()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outpoint::OutPoint;

    fn cert() -> ScCertificate {
        ScCertificate {
            version: SC_CERT_VERSION,
            sc_id: [5u8; 32],
            epoch_number: 3,
            quality: 12,
            end_epoch_block_hash: [6u8; 32],
            sc_proof: vec![0xaa; 8],
            vin: vec![TxIn {
                prevout: OutPoint::new([1u8; 32], 0),
                script_sig: Vec::new(),
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value: 10,
                script_pubkey: vec![0x51],
            }],
            backward_transfers: vec![
                BackwardTransfer {
                    amount: 4,
                    pub_key_hash: [8u8; 20],
                },
                BackwardTransfer {
                    amount: 6,
                    pub_key_hash: [9u8; 20],
                },
            ],
        }
    }

    #[test]
    fn backward_transfers_follow_change() {
        let cert = cert();
        let outputs = cert.all_outputs();
        assert_eq!(cert.first_bwt_pos(), 1);
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[1].value, 4);
        assert_eq!(outputs[2].script_pubkey.len(), 25);
        assert_eq!(cert.bwt_total(), Some(10));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut bytes = cert().consensus_encode();
        assert_eq!(ScCertificate::consensus_decode(&bytes), Ok(cert()));
        bytes[0] = 1;
        assert!(ScCertificate::consensus_decode(&bytes).is_err());
    }
}
