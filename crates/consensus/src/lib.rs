//! Consensus constants, network parameters and the reward schedule.

pub mod constants;
pub mod money;
pub mod params;
pub mod rewards;

pub use params::{
    chain_params, consensus_params, hash256_from_hex, hash256_to_hex, ChainParams,
    ConsensusParams, EquihashParams, Network,
};
pub use rewards::{block_subsidy, community_fund_amount, community_fund_script};

/// 32-byte hash in internal (little-endian) byte order.
pub type Hash256 = [u8; 32];
