//! Sidechain registry records, epoch arithmetic and the event schedule.
//!
//! Epoch `e` of a sidechain covers heights
//! `[start(e), start(e + 1))` with `start(e) = creation + e * len`. A
//! certificate for epoch `e` is accepted inside its submission window
//! `[start(e + 1), start(e + 1) + margin]` and the sidechain ceases right
//! after the window for the epoch following its last certificate closes.

use std::collections::{BTreeMap, BTreeSet};

use zend_consensus::money::Amount;
use zend_consensus::Hash256;
use zend_primitives::encoding::{DecodeError, Decoder, Encoder};

/// Epoch value of a sidechain that has not received any certificate.
pub const CERT_NULL_EPOCH: i32 = -1;
pub const CERT_NULL_QUALITY: i64 = -1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScState {
    Alive,
    Ceased,
    /// Only known to the mempool.
    Unconfirmed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SidechainRecord {
    /// `-1` for sidechains created by a mempool transaction.
    pub creation_block_height: i32,
    pub creation_tx_hash: Hash256,
    pub withdrawal_epoch_length: i32,
    pub balance: Amount,
    pub last_top_quality_cert_hash: Hash256,
    pub last_top_quality_cert_epoch: i32,
    pub last_top_quality_cert_quality: i64,
    pub last_top_quality_cert_bwt_amount: Amount,
    pub custom_data: Vec<u8>,
    pub wcert_vk: Vec<u8>,
    /// Maturity height to forward transfer amount not yet in the balance.
    pub immature_amounts: BTreeMap<i32, Amount>,
}

impl SidechainRecord {
    pub fn new(
        creation_block_height: i32,
        creation_tx_hash: Hash256,
        withdrawal_epoch_length: i32,
        custom_data: Vec<u8>,
        wcert_vk: Vec<u8>,
    ) -> Self {
        Self {
            creation_block_height,
            creation_tx_hash,
            withdrawal_epoch_length,
            balance: 0,
            last_top_quality_cert_hash: [0u8; 32],
            last_top_quality_cert_epoch: CERT_NULL_EPOCH,
            last_top_quality_cert_quality: CERT_NULL_QUALITY,
            last_top_quality_cert_bwt_amount: 0,
            custom_data,
            wcert_vk,
            immature_amounts: BTreeMap::new(),
        }
    }

    pub fn epoch_for(&self, height: i32) -> i32 {
        if height < self.creation_block_height || self.withdrawal_epoch_length <= 0 {
            return CERT_NULL_EPOCH;
        }
        (height - self.creation_block_height) / self.withdrawal_epoch_length
    }

    pub fn start_height_for_epoch(&self, epoch: i32) -> i32 {
        self.creation_block_height
            .saturating_add(epoch.saturating_mul(self.withdrawal_epoch_length))
    }

    pub fn safeguard_margin(&self) -> i32 {
        self.withdrawal_epoch_length / 5
    }

    pub fn cert_window_start(&self, epoch: i32) -> i32 {
        self.start_height_for_epoch(epoch + 1)
    }

    /// Last height (inclusive) a certificate for `epoch` may be mined at.
    pub fn cert_window_end(&self, epoch: i32) -> i32 {
        self.cert_window_start(epoch) + self.safeguard_margin()
    }

    /// Last block that the sidechain is alive at. The ceasing event is
    /// applied when the block at this height connects.
    pub fn scheduled_ceasing_height(&self) -> i32 {
        self.cert_window_end(self.last_top_quality_cert_epoch + 1)
    }

    /// Maturity height of the backward transfers of a certificate for
    /// `epoch`: spendable once the next certificate window closed without
    /// the sidechain ceasing.
    pub fn bwt_maturity_height(&self, epoch: i32) -> i32 {
        self.cert_window_end(epoch + 1) + 1
    }

    pub fn state_at(&self, height: i32) -> ScState {
        if self.creation_block_height < 0 {
            return ScState::Unconfirmed;
        }
        if height > self.scheduled_ceasing_height() {
            ScState::Ceased
        } else {
            ScState::Alive
        }
    }

    pub fn immature_total(&self) -> Amount {
        self.immature_amounts.values().sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.creation_block_height);
        encoder.write_hash_le(&self.creation_tx_hash);
        encoder.write_i32_le(self.withdrawal_epoch_length);
        encoder.write_i64_le(self.balance);
        encoder.write_hash_le(&self.last_top_quality_cert_hash);
        encoder.write_i32_le(self.last_top_quality_cert_epoch);
        encoder.write_i64_le(self.last_top_quality_cert_quality);
        encoder.write_i64_le(self.last_top_quality_cert_bwt_amount);
        encoder.write_var_bytes(&self.custom_data);
        encoder.write_var_bytes(&self.wcert_vk);
        encoder.write_varint(self.immature_amounts.len() as u64);
        for (height, amount) in &self.immature_amounts {
            encoder.write_i32_le(*height);
            encoder.write_i64_le(*amount);
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let mut record = Self {
            creation_block_height: decoder.read_i32_le()?,
            creation_tx_hash: decoder.read_hash_le()?,
            withdrawal_epoch_length: decoder.read_i32_le()?,
            balance: decoder.read_i64_le()?,
            last_top_quality_cert_hash: decoder.read_hash_le()?,
            last_top_quality_cert_epoch: decoder.read_i32_le()?,
            last_top_quality_cert_quality: decoder.read_i64_le()?,
            last_top_quality_cert_bwt_amount: decoder.read_i64_le()?,
            custom_data: decoder.read_var_bytes()?,
            wcert_vk: decoder.read_var_bytes()?,
            immature_amounts: BTreeMap::new(),
        };
        let count = decoder.read_len()?;
        for _ in 0..count {
            let height = decoder.read_i32_le()?;
            let amount = decoder.read_i64_le()?;
            record.immature_amounts.insert(height, amount);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(record)
    }
}

/// Sidechains with something scheduled at one height.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScEvents {
    pub maturing: BTreeSet<Hash256>,
    pub ceasing: BTreeSet<Hash256>,
}

impl ScEvents {
    pub fn is_empty(&self) -> bool {
        self.maturing.is_empty() && self.ceasing.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        for set in [&self.maturing, &self.ceasing] {
            encoder.write_varint(set.len() as u64);
            for sc_id in set {
                encoder.write_hash_le(sc_id);
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let mut events = Self::default();
        for set in [&mut events.maturing, &mut events.ceasing] {
            let count = decoder.read_len()?;
            for _ in 0..count {
                set.insert(decoder.read_hash_le()?);
            }
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(events)
    }
}

/// Store key for the events at `height`; big-endian so scans run in order.
pub fn events_key(height: i32) -> [u8; 4] {
    (height.max(0) as u32).to_be_bytes()
}
