//! Fixed-point monetary amount (C1). One whole coin is `COIN` units; every
//! arithmetic operation fails rather than wraps when it would leave
//! `[0, MAX_MONEY]`, mirroring the teacher's `ErrorKind::IntegerOverflow`
//! pattern (`error.rs`, `script_error.rs`) rather than Rust's `wrapping_*` ops.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Smallest units per whole coin.
pub const COIN: i64 = 100_000_000;

/// Eighth of a coin's worth of sigop weight headroom, Bitcoin-style money
/// ceiling: twenty-one million coins.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

pub type AmountResult<T> = std::result::Result<T, Box<ErrorKind>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OutOfRange(i64),
    Overflow,
}

impl std::error::Error for ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::OutOfRange(v) => {
                write!(f, "amount {} is out of money range [0, {}]", v, MAX_MONEY)
            }
            ErrorKind::Overflow => write!(f, "amount arithmetic overflowed"),
        }
    }
}

/// A signed 64-bit quantity of the smallest unit. Signed so that intermediate
/// differences (e.g. a fee computed as `input_sum - output_sum`) can be
/// checked for validity before being coerced back into a non-negative amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Constructs an `Amount`, failing if it falls outside `[0, MAX_MONEY]`.
    pub fn new(units: i64) -> AmountResult<Self> {
        let amount = Amount(units);
        if !amount.is_money_range() {
            return Err(Box::new(ErrorKind::OutOfRange(units)));
        }
        Ok(amount)
    }

    pub fn units(self) -> i64 {
        self.0
    }

    /// `IsMoneyRange`: true iff `0 <= units <= MAX_MONEY`.
    pub fn is_money_range(self) -> bool {
        self.0 >= 0 && self.0 <= MAX_MONEY
    }

    pub fn checked_add(self, other: Amount) -> AmountResult<Amount> {
        let sum = self.0.checked_add(other.0).ok_or(ErrorKind::Overflow)?;
        Amount::new(sum)
    }

    pub fn checked_sub(self, other: Amount) -> AmountResult<Amount> {
        let diff = self.0.checked_sub(other.0).ok_or(ErrorKind::Overflow)?;
        Amount::new(diff)
    }

    /// Multiply by a small non-negative integer (block subsidy halving,
    /// fee-per-kb scaling). Fails rather than wraps on overflow.
    pub fn checked_mul(self, factor: i64) -> AmountResult<Amount> {
        let product = self.0.checked_mul(factor).ok_or(ErrorKind::Overflow)?;
        Amount::new(product)
    }

    /// Sums a sequence of amounts, failing as soon as any partial sum leaves
    /// the money range (so a malicious single huge amount can't hide behind
    /// later negative-looking terms — there are none, amounts are never
    /// negative once constructed, but overflow can still occur).
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> AmountResult<Amount> {
        let mut total = Amount::ZERO;
        for amount in amounts {
            total = total.checked_add(amount)?;
        }
        Ok(total)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / COIN, (self.0 % COIN).abs())
    }
}

/// Infallible combinators are intentionally not provided via `std::ops`
/// beyond this point — `Add`/`Sub` panic on out-of-range the same way the
/// teacher's unsigned-subtraction UTXO bookkeeping (`compute_fee` in
/// `v1/transaction.rs`) would underflow-panic in debug builds. Prefer the
/// `checked_*` methods at any consensus-critical boundary.
impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        self.checked_add(rhs).expect("amount addition out of range")
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        self.checked_sub(rhs).expect("amount subtraction out of range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_and_over_max() {
        assert!(Amount::new(-1).is_err());
        assert!(Amount::new(MAX_MONEY + 1).is_err());
        assert!(Amount::new(MAX_MONEY).is_ok());
        assert!(Amount::new(0).is_ok());
    }

    #[test]
    fn checked_add_respects_range() {
        let max = Amount::new(MAX_MONEY).unwrap();
        let one = Amount::new(1).unwrap();
        assert!(max.checked_add(one).is_err());
    }

    #[test]
    fn checked_sub_rejects_negative_result() {
        let one = Amount::new(1).unwrap();
        let two = Amount::new(2).unwrap();
        assert!(one.checked_sub(two).is_err());
    }

    #[test]
    fn checked_sum_accumulates() {
        let amounts = vec![Amount::new(100).unwrap(), Amount::new(200).unwrap()];
        assert_eq!(Amount::checked_sum(amounts).unwrap(), Amount::new(300).unwrap());
    }
}
