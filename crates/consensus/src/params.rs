//! Consensus parameter definitions.

use crate::money::{Amount, COIN};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Network::Mainnet),
            "test" | "testnet" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EquihashParams {
    pub n: u8,
    pub k: u8,
    pub solution_size: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub height: i32,
    pub hash: Hash256,
}

#[derive(Clone, Debug)]
pub struct CommunityFundParams {
    /// P2SH script hash receiving the fund share.
    pub script_hash: [u8; 20],
    pub start_height: i32,
    pub numerator: i64,
    pub denominator: i64,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub genesis_time: u32,
    pub genesis_bits: u32,
    pub pow_limit: Hash256,
    pub pow_allow_min_difficulty_after_height: Option<i32>,
    pub pow_no_retargeting: bool,
    pub digishield_averaging_window: i64,
    pub digishield_max_adjust_down: i64,
    pub digishield_max_adjust_up: i64,
    pub pow_target_spacing: i64,
    pub equihash: EquihashParams,
    pub initial_subsidy: Amount,
    pub subsidy_halving_interval: i32,
    pub community_fund: CommunityFundParams,
    /// First height allowed to carry sidechain-enabled blocks.
    pub sc_fork_height: i32,
    /// Blocks a forward transfer waits before it reaches the sidechain balance.
    pub sc_coins_maturity: i32,
    pub checkpoints: Vec<Checkpoint>,
    /// Chain work below which the node still considers itself in bulk sync.
    pub minimum_chain_work: Hash256,
}

impl ConsensusParams {
    pub fn digishield_averaging_window_timespan(&self) -> i64 {
        self.digishield_averaging_window * self.pow_target_spacing
    }

    pub fn digishield_min_actual_timespan(&self) -> i64 {
        (self.digishield_averaging_window_timespan() * (100 - self.digishield_max_adjust_up)) / 100
    }

    pub fn digishield_max_actual_timespan(&self) -> i64 {
        (self.digishield_averaging_window_timespan() * (100 + self.digishield_max_adjust_down))
            / 100
    }

    pub fn sc_enabled_at(&self, height: i32) -> bool {
        height >= self.sc_fork_height
    }

    pub fn last_checkpoint_height(&self) -> i32 {
        self.checkpoints
            .iter()
            .map(|checkpoint| checkpoint.height)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub consensus: ConsensusParams,
    pub message_start: [u8; 4],
    pub default_port: u16,
    pub require_standard: bool,
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "hash hex has invalid length"),
            HexError::InvalidHex => write!(f, "hash hex has invalid digits"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses display-order hex (as printed by explorers) into internal order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    let hex = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }
    let padded = format!("{hex:0>64}");
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        *byte_out = u8::from_str_radix(&padded[i * 2..i * 2 + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    hash.iter().rev().map(|byte| format!("{byte:02x}")).collect()
}

const fn hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit in hash constant"),
    }
}

/// Compile-time variant of [`hash256_from_hex`] for parameter tables.
pub const fn hash256_const(hex: &str) -> Hash256 {
    let bytes = hex.as_bytes();
    assert!(bytes.len() == 64, "hash constant must be 64 hex digits");
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[31 - i] = (hex_nibble(bytes[2 * i]) << 4) | hex_nibble(bytes[2 * i + 1]);
        i += 1;
    }
    out
}

const MAINNET_POW_LIMIT: Hash256 =
    hash256_const("0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff");
const TESTNET_POW_LIMIT: Hash256 =
    hash256_const("07ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff");
const REGTEST_POW_LIMIT: Hash256 =
    hash256_const("0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f");
const MAINNET_MINIMUM_CHAIN_WORK: Hash256 =
    hash256_const("00000000000000000000000000000000000000000000000000000c8b4bd9bb3f");

const EH_200_9: EquihashParams = EquihashParams {
    n: 200,
    k: 9,
    solution_size: 1344,
};
const EH_48_5: EquihashParams = EquihashParams {
    n: 48,
    k: 5,
    solution_size: 36,
};

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

pub fn chain_params(network: Network) -> ChainParams {
    let consensus = consensus_params(network);
    match network {
        Network::Mainnet => ChainParams {
            network,
            consensus,
            message_start: [0x63, 0x61, 0x73, 0x68],
            default_port: 9033,
            require_standard: true,
        },
        Network::Testnet => ChainParams {
            network,
            consensus,
            message_start: [0xbf, 0xf2, 0xcd, 0xe6],
            default_port: 19033,
            require_standard: true,
        },
        Network::Regtest => ChainParams {
            network,
            consensus,
            message_start: [0x2f, 0x54, 0xcc, 0x9d],
            default_port: 19133,
            require_standard: false,
        },
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        genesis_time: 1_478_403_829,
        genesis_bits: 0x1f07_ffff,
        pow_limit: MAINNET_POW_LIMIT,
        pow_allow_min_difficulty_after_height: None,
        pow_no_retargeting: false,
        digishield_averaging_window: 17,
        digishield_max_adjust_down: 32,
        digishield_max_adjust_up: 16,
        pow_target_spacing: 120,
        equihash: EH_200_9,
        initial_subsidy: 125 * COIN / 10,
        subsidy_halving_interval: 840_000,
        community_fund: CommunityFundParams {
            script_hash: [
                0x58, 0x1d, 0xd4, 0x27, 0x7d, 0x77, 0x4f, 0x2c, 0x2d, 0x4b, 0xad, 0x51, 0x74,
                0x28, 0x94, 0x76, 0xd6, 0x4c, 0xfa, 0x8a,
            ],
            start_height: 1,
            numerator: 20,
            denominator: 100,
        },
        sc_fork_height: 1_047_624,
        sc_coins_maturity: 10,
        checkpoints: Vec::new(),
        minimum_chain_work: MAINNET_MINIMUM_CHAIN_WORK,
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        genesis_time: 1_479_443_947,
        genesis_bits: 0x2007_ffff,
        pow_limit: TESTNET_POW_LIMIT,
        pow_allow_min_difficulty_after_height: Some(299_187),
        sc_fork_height: 926_225,
        sc_coins_maturity: 10,
        community_fund: CommunityFundParams {
            script_hash: [
                0x2e, 0x3c, 0x55, 0x6f, 0xf8, 0x15, 0x2f, 0x6a, 0x1b, 0x1a, 0x9a, 0x5a, 0x23,
                0x40, 0x6c, 0x14, 0x1c, 0xd3, 0x7a, 0x4b,
            ],
            start_height: 1,
            numerator: 20,
            denominator: 100,
        },
        minimum_chain_work: [0u8; 32],
        ..mainnet_consensus_params()
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        genesis_time: 1_494_548_150,
        genesis_bits: 0x200f_0f0f,
        pow_limit: REGTEST_POW_LIMIT,
        pow_allow_min_difficulty_after_height: Some(0),
        pow_no_retargeting: true,
        digishield_max_adjust_down: 0,
        digishield_max_adjust_up: 0,
        equihash: EH_48_5,
        subsidy_halving_interval: 2_000,
        community_fund: CommunityFundParams {
            script_hash: [0x11; 20],
            start_height: 1,
            numerator: 20,
            denominator: 100,
        },
        sc_fork_height: 0,
        sc_coins_maturity: 2,
        checkpoints: Vec::new(),
        minimum_chain_work: [0u8; 32],
        ..mainnet_consensus_params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_uses_display_order() {
        let hash = hash256_from_hex("0x01").expect("hex");
        assert_eq!(hash[0], 1);
        assert!(hash[1..].iter().all(|byte| *byte == 0));
        assert_eq!(
            hash256_to_hex(&hash),
            "0000000000000000000000000000000000000000000000000000000000000001"
        );
        assert!(hash256_from_hex("zz").is_err());
        assert_eq!(
            hash256_const("0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff"),
            hash256_from_hex("0007ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
                .expect("hex")
        );
    }

    #[test]
    fn regtest_overrides() {
        let params = consensus_params(Network::Regtest);
        assert!(params.pow_no_retargeting);
        assert!(params.sc_enabled_at(0));
        assert_eq!(params.equihash, EH_48_5);
        assert_eq!(Network::parse("REGTEST"), Some(Network::Regtest));
    }
}
