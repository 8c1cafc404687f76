//! Key-value storage seam for the chain-state ledger.
//!
//! Every mutation of persisted ledger state goes through a [`WriteBatch`] so
//! that a connect or disconnect step lands on disk as one atomic unit.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod memory;

#[cfg(feature = "fjall")]
pub mod fjall;

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
    Corrupt(&'static str),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
            StoreError::Corrupt(what) => write!(f, "corrupt store entry: {what}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Column {
    /// Block hash to serialized index node.
    BlockIndex,
    /// Transaction id to coin record.
    Coins,
    /// Sidechain id to sidechain record.
    Sidechains,
    /// Big-endian height to scheduled sidechain events.
    ScEvents,
    /// Cumulative sidechain commitment root to the height that produced it.
    ScCommitmentHeight,
    /// Note commitment tree root to serialized tree.
    Anchors,
    Nullifiers,
    /// Sidechain id followed by nullifier, for ceased sidechain withdrawals.
    CswNullifiers,
    /// Optional txid to block location index.
    TxIndex,
    Meta,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::BlockIndex,
        Column::Coins,
        Column::Sidechains,
        Column::ScEvents,
        Column::ScCommitmentHeight,
        Column::Anchors,
        Column::Nullifiers,
        Column::CswNullifiers,
        Column::TxIndex,
        Column::Meta,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::BlockIndex => "block_index",
            Column::Coins => "coins",
            Column::Sidechains => "sidechains",
            Column::ScEvents => "sc_events",
            Column::ScCommitmentHeight => "sc_commitment_height",
            Column::Anchors => "anchors",
            Column::Nullifiers => "nullifiers",
            Column::CswNullifiers => "csw_nullifiers",
            Column::TxIndex => "tx_index",
            Column::Meta => "meta",
        }
    }
}

pub type KeyBytes = SmallVec<[u8; 64]>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WriteOp {
    Put {
        column: Column,
        key: KeyBytes,
        value: Vec<u8>,
    },
    Delete {
        column: Column,
        key: KeyBytes,
    },
}

impl WriteOp {
    pub fn column(&self) -> Column {
        match self {
            WriteOp::Put { column, .. } | WriteOp::Delete { column, .. } => *column,
        }
    }
}

/// Ordered list of puts and deletes applied atomically by
/// [`KeyValueStore::write_batch`]. Later operations on the same key win.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl AsRef<[u8]>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put {
            column,
            key: SmallVec::from_slice(key.as_ref()),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl AsRef<[u8]>) {
        self.ops.push(WriteOp::Delete {
            column,
            key: SmallVec::from_slice(key.as_ref()),
        });
    }

    pub fn append(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    /// Applies every operation or none of them.
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    fn contains(&self, column: Column, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(column, key)?.is_some())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().get(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.as_ref().scan_prefix(column, prefix)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write_batch(batch)
    }

    fn contains(&self, column: Column, key: &[u8]) -> Result<bool, StoreError> {
        self.as_ref().contains(column, key)
    }
}
