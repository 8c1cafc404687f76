//! Consensus-wide constants shared across validation.

/// Block version carrying certificates and the sidechain commitment root.
pub const BLOCK_VERSION_SC_SUPPORT: i32 = 3;
pub const BLOCK_VERSION_ORIGINAL: i32 = 4;
pub const BLOCK_VERSION_BEFORE_SC: i32 = 0x2000_0000;
/// The minimum allowed block version (network rule).
pub const MIN_BLOCK_VERSION: i32 = BLOCK_VERSION_SC_SUPPORT;

pub const TRANSPARENT_TX_VERSION: i32 = 1;
pub const PHGR_TX_VERSION: i32 = 2;
pub const GROTH_TX_VERSION: i32 = -3;
pub const SC_TX_VERSION: i32 = -4;
pub const SC_CERT_VERSION: i32 = -5;

/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 4_000_000;
/// Size limit for blocks that cannot carry certificates.
pub const MAX_BLOCK_SIZE_BEFORE_SC: u32 = 2_000_000;
/// Share of a sidechain-enabled block usable by plain transactions.
pub const BLOCK_TX_PARTITION_SIZE: u32 = MAX_BLOCK_SIZE_BEFORE_SC;
pub const MAX_TX_SIZE: u32 = 100_000;
pub const MAX_CERT_SIZE: u32 = 150_000;
/// The maximum allowed number of signature check operations in a block (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = 20_000;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Maximum number of seconds a block timestamp may run ahead of the local clock.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;
/// Number of ancestors used for median-time-past.
pub const MEDIAN_TIME_SPAN: usize = 11;
/// Lock times below this are heights, above are unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
pub const MAX_COINBASE_SCRIPT_SIG: usize = 100;
pub const MIN_COINBASE_SCRIPT_SIG: usize = 2;

pub const MIN_SC_WITHDRAWAL_EPOCH_LENGTH: i32 = 2;
pub const MAX_SC_WITHDRAWAL_EPOCH_LENGTH: i32 = 4032;
pub const MAX_SC_CUSTOM_DATA_LEN: usize = 1024;
pub const MAX_SC_PROOF_SIZE: usize = 9 * 1024;

/// Blocks connected per activation step before the chain-state lock is yielded.
pub const MAX_BLOCKS_PER_ACTIVATION_STEP: usize = 32;
/// Height gap below which a late block carries no chain delay.
pub const CHAIN_DELAY_PENALTY_THRESHOLD: i32 = 0;
