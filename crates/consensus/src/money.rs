//! Monetary units and money range rules.

pub type Amount = i64;

pub const COIN: Amount = 100_000_000;
pub const CENT: Amount = 1_000_000;

/// No amount larger than this (in zatoshi) is valid.
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// Adds two in-range amounts, failing when the sum leaves the money range.
pub fn checked_money_add(lhs: Amount, rhs: Amount) -> Option<Amount> {
    let sum = lhs.checked_add(rhs)?;
    money_range(sum).then_some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_edges() {
        assert!(money_range(0));
        assert!(money_range(MAX_MONEY));
        assert!(!money_range(-1));
        assert!(!money_range(MAX_MONEY + 1));
        assert_eq!(checked_money_add(MAX_MONEY, 1), None);
        assert_eq!(checked_money_add(COIN, CENT), Some(COIN + CENT));
    }
}
