//! Rejection taxonomy shared by block validation, reorg and mempool admission.

use std::fmt;

use zend_storage::StoreError;

use crate::flatfiles::FlatFileError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RejectKind {
    /// Could not be parsed or structurally checked; dropped without a harsh ban.
    Malformed,
    /// Breaks a consensus rule.
    Invalid,
    /// Relay policy only; a miner may still include it.
    NonStandard,
    /// Depends on something not seen yet.
    MissingInput,
    /// Disk or memory failure. The process should stop.
    System,
}

impl RejectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectKind::Malformed => "malformed",
            RejectKind::Invalid => "invalid",
            RejectKind::NonStandard => "nonstandard",
            RejectKind::MissingInput => "missing-input",
            RejectKind::System => "system",
        }
    }
}

/// Reject codes from the wire protocol.
pub const REJECT_MALFORMED: u8 = 0x01;
pub const REJECT_INVALID: u8 = 0x10;
pub const REJECT_OBSOLETE: u8 = 0x11;
pub const REJECT_DUPLICATE: u8 = 0x12;
pub const REJECT_NONSTANDARD: u8 = 0x40;
pub const REJECT_INSUFFICIENTFEE: u8 = 0x42;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RejectReason {
    pub kind: RejectKind,
    pub code: u8,
    pub reason: String,
    /// 0..=100 points the relaying peer should be penalized with.
    pub ban_score: u32,
}

impl RejectReason {
    pub fn invalid(ban_score: u32, reason: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::Invalid,
            code: REJECT_INVALID,
            reason: reason.into(),
            ban_score: ban_score.min(100),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::Malformed,
            code: REJECT_MALFORMED,
            reason: reason.into(),
            ban_score: 0,
        }
    }

    pub fn nonstandard(code: u8, reason: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::NonStandard,
            code,
            reason: reason.into(),
            ban_score: 0,
        }
    }

    pub fn missing(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::MissingInput,
            code: REJECT_INVALID,
            reason: reason.into(),
            ban_score: 0,
        }
    }

    pub fn with_code(mut self, code: u8) -> Self {
        self.code = code;
        self
    }

    /// Invalid rejections that a corrupted relay could have produced without
    /// the block itself being bad (mutated merkle trees, oversized payloads).
    pub fn corruption_possible(&self) -> bool {
        matches!(
            self.reason.as_str(),
            "bad-txnmrklroot" | "bad-txns-duplicate" | "bad-blk-length"
        )
    }

    pub fn is_invalid(&self) -> bool {
        self.kind == RejectKind::Invalid
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.reason, self.kind.as_str())?;
        if self.ban_score > 0 {
            write!(f, ", ban {}", self.ban_score)?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for RejectReason {}

#[derive(Debug)]
pub enum ChainStateError {
    Rejected(RejectReason),
    Store(StoreError),
    FlatFile(FlatFileError),
    Corrupt(&'static str),
    UnknownBlock,
}

impl ChainStateError {
    /// System failures abort activation instead of marking blocks invalid.
    pub fn is_system(&self) -> bool {
        match self {
            ChainStateError::Rejected(reason) => reason.kind == RejectKind::System,
            ChainStateError::Store(_)
            | ChainStateError::FlatFile(_)
            | ChainStateError::Corrupt(_) => true,
            ChainStateError::UnknownBlock => false,
        }
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            ChainStateError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStateError::Rejected(reason) => write!(f, "{reason}"),
            ChainStateError::Store(err) => write!(f, "store: {err}"),
            ChainStateError::FlatFile(err) => write!(f, "block files: {err}"),
            ChainStateError::Corrupt(message) => write!(f, "corrupt chain state: {message}"),
            ChainStateError::UnknownBlock => write!(f, "unknown block"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<RejectReason> for ChainStateError {
    fn from(reason: RejectReason) -> Self {
        ChainStateError::Rejected(reason)
    }
}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

impl From<FlatFileError> for ChainStateError {
    fn from(err: FlatFileError) -> Self {
        ChainStateError::FlatFile(err)
    }
}
