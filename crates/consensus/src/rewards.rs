//! Subsidy and community fund schedule.

use crate::money::Amount;
use crate::params::ConsensusParams;

const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;

pub fn block_subsidy(height: i32, params: &ConsensusParams) -> Amount {
    if height <= 0 || params.subsidy_halving_interval <= 0 {
        return if height == 0 { 0 } else { params.initial_subsidy };
    }
    let halvings = (height - 1) / params.subsidy_halving_interval;
    if halvings >= 64 {
        return 0;
    }
    params.initial_subsidy >> halvings
}

/// Exact amount the coinbase must pay to the community fund at `height`.
pub fn community_fund_amount(height: i32, params: &ConsensusParams) -> Amount {
    let fund = &params.community_fund;
    if height < fund.start_height || fund.denominator == 0 {
        return 0;
    }
    block_subsidy(height, params) * fund.numerator / fund.denominator
}

pub fn community_fund_script(params: &ConsensusParams) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(&params.community_fund.script_hash);
    script.push(OP_EQUAL);
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::COIN;
    use crate::params::{consensus_params, Network};

    #[test]
    fn subsidy_halves_on_schedule() {
        let params = consensus_params(Network::Regtest);
        let interval = params.subsidy_halving_interval;
        assert_eq!(block_subsidy(0, &params), 0);
        assert_eq!(block_subsidy(1, &params), 125 * COIN / 10);
        assert_eq!(block_subsidy(interval, &params), 125 * COIN / 10);
        assert_eq!(block_subsidy(interval + 1, &params), 125 * COIN / 20);
    }

    #[test]
    fn fund_share_is_a_fifth() {
        let params = consensus_params(Network::Regtest);
        assert_eq!(community_fund_amount(1, &params), 25 * COIN / 10);
        assert_eq!(community_fund_script(&params).len(), 23);
    }
}
