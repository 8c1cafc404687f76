//! Per-transaction output records in the coin set.

use zend_consensus::constants::COINBASE_MATURITY;
use zend_primitives::certificate::ScCertificate;
use zend_primitives::encoding::{DecodeError, Decoder, Encoder};
use zend_primitives::transaction::{Transaction, TxOut};

/// Height used for coins that only exist in the mempool.
pub const MEMPOOL_HEIGHT: i32 = 0x7fff_ffff;

/// Metadata shared by every output of one transaction or certificate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CoinMeta {
    pub version: i32,
    pub height: i32,
    pub is_coinbase: bool,
    pub from_cert: bool,
    /// Position of the first backward transfer output; outputs before it
    /// are certificate change.
    pub first_bwt_pos: u32,
    pub bwt_maturity_height: i32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputMaturity {
    Mature,
    Immature,
    /// The output was voided or spent.
    Unavailable,
}

/// Outputs of one transaction; `None` marks a spent output. A record whose
/// outputs are all spent is pruned and treated as absent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoinRecord {
    pub meta: CoinMeta,
    pub outputs: Vec<Option<TxOut>>,
}

impl CoinRecord {
    pub fn from_tx(tx: &Transaction, height: i32) -> Self {
        let mut record = Self {
            meta: CoinMeta {
                version: tx.version,
                height,
                is_coinbase: tx.is_coinbase(),
                from_cert: false,
                first_bwt_pos: tx.vout.len() as u32,
                bwt_maturity_height: 0,
            },
            outputs: tx.vout.iter().cloned().map(Some).collect(),
        };
        record.cleanup();
        record
    }

    pub fn from_cert(cert: &ScCertificate, height: i32, bwt_maturity_height: i32) -> Self {
        let mut record = Self {
            meta: CoinMeta {
                version: cert.version,
                height,
                is_coinbase: false,
                from_cert: true,
                first_bwt_pos: cert.first_bwt_pos() as u32,
                bwt_maturity_height,
            },
            outputs: cert.all_outputs().into_iter().map(Some).collect(),
        };
        record.cleanup();
        record
    }

    pub fn empty(meta: CoinMeta) -> Self {
        Self {
            meta,
            outputs: Vec::new(),
        }
    }

    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    /// Drops trailing spent outputs so equal ledgers encode identically.
    pub fn cleanup(&mut self) {
        while matches!(self.outputs.last(), Some(None)) {
            self.outputs.pop();
        }
    }

    pub fn is_available(&self, pos: u32) -> bool {
        matches!(self.outputs.get(pos as usize), Some(Some(_)))
    }

    pub fn output(&self, pos: u32) -> Option<&TxOut> {
        self.outputs.get(pos as usize).and_then(Option::as_ref)
    }

    pub fn is_bwt_output(&self, pos: u32) -> bool {
        self.meta.from_cert && pos >= self.meta.first_bwt_pos
    }

    /// Marks `pos` spent and returns the output it held.
    pub fn spend(&mut self, pos: u32) -> Option<TxOut> {
        let taken = self.outputs.get_mut(pos as usize)?.take();
        self.cleanup();
        taken
    }

    /// Puts an output back, growing the vector as needed.
    pub fn restore(&mut self, pos: u32, out: TxOut) -> bool {
        let pos = pos as usize;
        if self.outputs.len() <= pos {
            self.outputs.resize(pos + 1, None);
        }
        if self.outputs[pos].is_some() {
            return false;
        }
        self.outputs[pos] = Some(out);
        true
    }

    pub fn output_maturity(&self, pos: u32, spend_height: i32) -> OutputMaturity {
        if !self.is_available(pos) {
            return OutputMaturity::Unavailable;
        }
        if self.meta.is_coinbase && spend_height - self.meta.height < COINBASE_MATURITY {
            return OutputMaturity::Immature;
        }
        if self.is_bwt_output(pos) && spend_height < self.meta.bwt_maturity_height {
            return OutputMaturity::Immature;
        }
        OutputMaturity::Mature
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encode_meta(&mut encoder, &self.meta);
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            match output {
                Some(out) => {
                    encoder.write_u8(1);
                    encoder.write_i64_le(out.value);
                    encoder.write_var_bytes(&out.script_pubkey);
                }
                None => encoder.write_u8(0),
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let meta = decode_meta(&mut decoder)?;
        let count = decoder.read_len()?;
        let mut outputs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let present = decoder.read_u8()?;
            outputs.push(match present {
                0 => None,
                1 => Some(TxOut {
                    value: decoder.read_i64_le()?,
                    script_pubkey: decoder.read_var_bytes()?,
                }),
                _ => return Err(DecodeError::InvalidData("invalid coin output marker")),
            });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { meta, outputs })
    }
}

pub(crate) fn encode_meta(encoder: &mut Encoder, meta: &CoinMeta) {
    encoder.write_i32_le(meta.version);
    encoder.write_i32_le(meta.height);
    let flags = u8::from(meta.is_coinbase) | (u8::from(meta.from_cert) << 1);
    encoder.write_u8(flags);
    encoder.write_u32_le(meta.first_bwt_pos);
    encoder.write_i32_le(meta.bwt_maturity_height);
}

pub(crate) fn decode_meta(decoder: &mut Decoder) -> Result<CoinMeta, DecodeError> {
    let version = decoder.read_i32_le()?;
    let height = decoder.read_i32_le()?;
    let flags = decoder.read_u8()?;
    if flags > 3 {
        return Err(DecodeError::InvalidData("invalid coin flags"));
    }
    Ok(CoinMeta {
        version,
        height,
        is_coinbase: flags & 1 != 0,
        from_cert: flags & 2 != 0,
        first_bwt_pos: decoder.read_u32_le()?,
        bwt_maturity_height: decoder.read_i32_le()?,
    })
}
