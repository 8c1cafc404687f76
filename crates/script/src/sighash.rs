//! Legacy signature hashing for transparent inputs of transactions and
//! certificates.
//!
//! The signed message is the entry re-serialized with every input script
//! blanked except the one being signed, trimmed according to the hash
//! type, followed by the hash type as a little-endian u32.

use zend_consensus::Hash256;
use zend_primitives::encoding::{Encodable, Encoder};
use zend_primitives::hash::sha256d;
use zend_primitives::transaction::{TxIn, TxOut};
use zend_primitives::txbase::TxBase;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SighashError {
    InputIndexOutOfRange,
    MissingOutput,
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
            SighashError::MissingOutput => write!(f, "no matching output for SIGHASH_SINGLE"),
        }
    }
}

impl std::error::Error for SighashError {}

pub fn signature_hash(
    entry: &TxBase,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Result<Hash256, SighashError> {
    let (vin, vout) = match entry {
        TxBase::Tx(tx) => (&tx.vin, &tx.vout),
        TxBase::Cert(cert) => (&cert.vin, &cert.vout),
    };
    if input_index >= vin.len() {
        return Err(SighashError::InputIndexOutOfRange);
    }
    let hash_single = sighash_type.base_type() == SIGHASH_SINGLE;
    let hash_none = sighash_type.base_type() == SIGHASH_NONE;
    if hash_single && input_index >= vout.len() {
        return Err(SighashError::MissingOutput);
    }

    let mut encoder = Encoder::new();
    match entry {
        TxBase::Tx(tx) => encoder.write_i32_le(tx.version),
        TxBase::Cert(cert) => {
            encoder.write_i32_le(cert.version);
            encoder.write_hash_le(&cert.sc_id);
            encoder.write_i32_le(cert.epoch_number);
            encoder.write_i64_le(cert.quality);
            encoder.write_hash_le(&cert.end_epoch_block_hash);
            encoder.write_var_bytes(&cert.sc_proof);
        }
    }

    write_inputs(
        &mut encoder,
        vin,
        input_index,
        script_code,
        sighash_type.has_anyone_can_pay(),
        hash_single || hash_none,
    );
    write_outputs(&mut encoder, vout, input_index, hash_single, hash_none);

    match entry {
        TxBase::Tx(tx) => {
            if tx.is_sc_version() {
                encoder.write_list(&tx.vcsw_ccin);
                encoder.write_list(&tx.vsc_ccout);
                encoder.write_list(&tx.vft_ccout);
            }
            encoder.write_u32_le(tx.lock_time);
            if tx.supports_join_splits() {
                encoder.write_list(&tx.join_splits);
            }
        }
        TxBase::Cert(cert) => encoder.write_list(&cert.backward_transfers),
    }

    encoder.write_u32_le(sighash_type.0);
    Ok(sha256d(&encoder.into_inner()))
}

fn write_inputs(
    encoder: &mut Encoder,
    vin: &[TxIn],
    signing: usize,
    script_code: &[u8],
    anyone_can_pay: bool,
    zero_other_sequences: bool,
) {
    let indices: Vec<usize> = if anyone_can_pay {
        vec![signing]
    } else {
        (0..vin.len()).collect()
    };
    encoder.write_varint(indices.len() as u64);
    for index in indices {
        let input = &vin[index];
        input.prevout.consensus_encode(encoder);
        if index == signing {
            encoder.write_var_bytes(script_code);
            encoder.write_u32_le(input.sequence);
        } else {
            encoder.write_varint(0);
            encoder.write_u32_le(if zero_other_sequences { 0 } else { input.sequence });
        }
    }
}

fn write_outputs(
    encoder: &mut Encoder,
    vout: &[TxOut],
    signing: usize,
    hash_single: bool,
    hash_none: bool,
) {
    if hash_none {
        encoder.write_varint(0);
        return;
    }
    if !hash_single {
        encoder.write_list(vout);
        return;
    }
    encoder.write_varint((signing + 1) as u64);
    for (index, output) in vout.iter().take(signing + 1).enumerate() {
        if index == signing {
            output.consensus_encode(encoder);
        } else {
            encoder.write_i64_le(-1);
            encoder.write_varint(0);
        }
    }
}
