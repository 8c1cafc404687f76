//! Per-block reversal data written next to the block files.

use zend_consensus::Hash256;
use zend_primitives::encoding::{DecodeError, Decoder, Encoder};
use zend_primitives::transaction::TxOut;

use crate::coins::{decode_meta, encode_meta, CoinMeta};
use crate::sidechain::{ScEvents, SidechainRecord};

const BLOCK_UNDO_VERSION: u8 = 1;

/// An output removed from the coin set, with enough metadata to recreate
/// its record if the removal pruned it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentCoin {
    pub meta: CoinMeta,
    pub out: TxOut,
}

/// A certificate output voided by supersession or ceasing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VoidedOutput {
    pub txid: Hash256,
    pub pos: u32,
    pub coin: SpentCoin,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxUndo {
    /// One entry per input, in input order.
    pub spent: Vec<SpentCoin>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CertUndo {
    pub spent: Vec<SpentCoin>,
    /// Backward transfers of the certificate this one superseded.
    pub voided: Vec<VoidedOutput>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockUndo {
    pub prev_anchor: Hash256,
    /// One entry per transaction, the coinbase included.
    pub txs: Vec<TxUndo>,
    pub certs: Vec<CertUndo>,
    /// Outputs voided by sidechains ceasing at this height.
    pub ceased: Vec<VoidedOutput>,
    /// Sidechain records as they were before the block touched them.
    pub sidechains: Vec<(Hash256, Option<SidechainRecord>)>,
    pub events: Vec<(i32, Option<ScEvents>)>,
}

impl BlockUndo {
    pub fn new(prev_anchor: Hash256) -> Self {
        Self {
            prev_anchor,
            ..Self::default()
        }
    }

    /// Keeps the first snapshot taken for `sc_id`; later ones are ignored.
    pub fn record_sidechain(&mut self, sc_id: &Hash256, prior: Option<SidechainRecord>) {
        if !self.sidechains.iter().any(|(id, _)| id == sc_id) {
            self.sidechains.push((*sc_id, prior));
        }
    }

    pub fn record_events(&mut self, height: i32, prior: Option<ScEvents>) {
        if !self.events.iter().any(|(h, _)| *h == height) {
            self.events.push((height, prior));
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_hash_le(&self.prev_anchor);
        encoder.write_varint(self.txs.len() as u64);
        for tx in &self.txs {
            write_spent(&mut encoder, &tx.spent);
        }
        encoder.write_varint(self.certs.len() as u64);
        for cert in &self.certs {
            write_spent(&mut encoder, &cert.spent);
            write_voided(&mut encoder, &cert.voided);
        }
        write_voided(&mut encoder, &self.ceased);
        encoder.write_varint(self.sidechains.len() as u64);
        for (sc_id, prior) in &self.sidechains {
            encoder.write_hash_le(sc_id);
            match prior {
                Some(record) => {
                    encoder.write_u8(1);
                    encoder.write_var_bytes(&record.encode());
                }
                None => encoder.write_u8(0),
            }
        }
        encoder.write_varint(self.events.len() as u64);
        for (height, prior) in &self.events {
            encoder.write_i32_le(*height);
            match prior {
                Some(events) => {
                    encoder.write_u8(1);
                    encoder.write_var_bytes(&events.encode());
                }
                None => encoder.write_u8(0),
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        if decoder.read_u8()? != BLOCK_UNDO_VERSION {
            return Err(DecodeError::InvalidData("unsupported block undo version"));
        }
        let prev_anchor = decoder.read_hash_le()?;
        let tx_count = decoder.read_len()?;
        let mut txs = Vec::with_capacity(tx_count.min(4096));
        for _ in 0..tx_count {
            txs.push(TxUndo {
                spent: read_spent(&mut decoder)?,
            });
        }
        let cert_count = decoder.read_len()?;
        let mut certs = Vec::with_capacity(cert_count.min(4096));
        for _ in 0..cert_count {
            let spent = read_spent(&mut decoder)?;
            let voided = read_voided(&mut decoder)?;
            certs.push(CertUndo { spent, voided });
        }
        let ceased = read_voided(&mut decoder)?;

        let sc_count = decoder.read_len()?;
        let mut sidechains = Vec::with_capacity(sc_count.min(4096));
        for _ in 0..sc_count {
            let sc_id = decoder.read_hash_le()?;
            let prior = match decoder.read_u8()? {
                0 => None,
                1 => Some(SidechainRecord::decode(&decoder.read_var_bytes()?)?),
                _ => return Err(DecodeError::InvalidData("invalid sidechain undo marker")),
            };
            sidechains.push((sc_id, prior));
        }
        let event_count = decoder.read_len()?;
        let mut events = Vec::with_capacity(event_count.min(4096));
        for _ in 0..event_count {
            let height = decoder.read_i32_le()?;
            let prior = match decoder.read_u8()? {
                0 => None,
                1 => Some(ScEvents::decode(&decoder.read_var_bytes()?)?),
                _ => return Err(DecodeError::InvalidData("invalid events undo marker")),
            };
            events.push((height, prior));
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            prev_anchor,
            txs,
            certs,
            ceased,
            sidechains,
            events,
        })
    }
}

fn write_coin(encoder: &mut Encoder, coin: &SpentCoin) {
    encode_meta(encoder, &coin.meta);
    encoder.write_i64_le(coin.out.value);
    encoder.write_var_bytes(&coin.out.script_pubkey);
}

fn read_coin(decoder: &mut Decoder) -> Result<SpentCoin, DecodeError> {
    Ok(SpentCoin {
        meta: decode_meta(decoder)?,
        out: TxOut {
            value: decoder.read_i64_le()?,
            script_pubkey: decoder.read_var_bytes()?,
        },
    })
}

fn write_spent(encoder: &mut Encoder, spent: &[SpentCoin]) {
    encoder.write_varint(spent.len() as u64);
    for coin in spent {
        write_coin(encoder, coin);
    }
}

fn read_spent(decoder: &mut Decoder) -> Result<Vec<SpentCoin>, DecodeError> {
    let count = decoder.read_len()?;
    let mut out = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        out.push(read_coin(decoder)?);
    }
    Ok(out)
}

fn write_voided(encoder: &mut Encoder, voided: &[VoidedOutput]) {
    encoder.write_varint(voided.len() as u64);
    for entry in voided {
        encoder.write_hash_le(&entry.txid);
        encoder.write_u32_le(entry.pos);
        write_coin(encoder, &entry.coin);
    }
}

fn read_voided(decoder: &mut Decoder) -> Result<Vec<VoidedOutput>, DecodeError> {
    let count = decoder.read_len()?;
    let mut out = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let txid = decoder.read_hash_le()?;
        let pos = decoder.read_u32_le()?;
        let coin = read_coin(decoder)?;
        out.push(VoidedOutput { txid, pos, coin });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(value: i64, from_cert: bool) -> SpentCoin {
        SpentCoin {
            meta: CoinMeta {
                version: if from_cert { -5 } else { 1 },
                height: 12,
                is_coinbase: !from_cert,
                from_cert,
                first_bwt_pos: 1,
                bwt_maturity_height: if from_cert { 40 } else { 0 },
            },
            out: TxOut {
                value,
                script_pubkey: vec![0x51],
            },
        }
    }

    #[test]
    fn undo_survives_encoding() {
        let mut undo = BlockUndo::new([3u8; 32]);
        undo.txs.push(TxUndo::default());
        undo.txs.push(TxUndo {
            spent: vec![coin(10, false), coin(20, false)],
        });
        undo.certs.push(CertUndo {
            spent: vec![coin(5, false)],
            voided: vec![VoidedOutput {
                txid: [4u8; 32],
                pos: 1,
                coin: coin(7, true),
            }],
        });
        undo.record_sidechain(&[5u8; 32], None);
        undo.record_sidechain(
            &[5u8; 32],
            Some(SidechainRecord::new(1, [0u8; 32], 10, Vec::new(), Vec::new())),
        );
        undo.record_events(30, Some(ScEvents::default()));

        assert_eq!(undo.sidechains.len(), 1);
        assert!(undo.sidechains[0].1.is_none());
        assert_eq!(BlockUndo::decode(&undo.encode()), Ok(undo));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = BlockUndo::new([0u8; 32]).encode();
        bytes[0] = 9;
        assert!(BlockUndo::decode(&bytes).is_err());
    }
}
