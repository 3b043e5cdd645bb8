//! Scalar types shared across the chain.

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// Block height
pub type Height = u64;

/// Account nonce (number of confirmed transactions sent)
pub type Nonce = u64;

/// Gas unit count
pub type Gas = u64;

/// Price per gas unit, in the smallest token denomination
pub type GasPrice = u64;

/// Milliseconds since the Unix epoch
pub type TimestampMs = u64;

/// Producer rotation round within a block height
pub type Round = u64;

/// Monotonic version of the committed state
pub type StateVersion = u64;

/// A token amount.
///
/// Backed by an arbitrary-precision unsigned integer so balances cannot
/// silently wrap. Arithmetic goes through the checked methods; subtraction
/// reports underflow instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Amount(BigUint);

impl Amount {
    pub fn new(value: BigUint) -> Self {
        Amount(value)
    }

    pub fn zero() -> Self {
        Amount(BigUint::zero())
    }

    pub fn from_u64(value: u64) -> Self {
        Amount(BigUint::from(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Amount(BigUint::from(value))
    }

    pub fn inner(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checked addition. Cannot overflow with an arbitrary-precision
    /// backing type, but keeps call sites uniform with subtraction.
    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        Some(Amount(&self.0 + &other.0))
    }

    /// Checked subtraction, `None` on underflow
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.0 >= other.0 {
            Some(Amount(&self.0 - &other.0))
        } else {
            None
        }
    }

    /// Decimal string representation
    pub fn to_decimal_string(&self) -> String {
        self.0.to_str_radix(10)
    }

    /// Parses a decimal string
    pub fn from_decimal_string(s: &str) -> Option<Amount> {
        BigUint::parse_bytes(s.as_bytes(), 10).map(Amount)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_checked_arithmetic() {
        let a = Amount::from_u64(100);
        let b = Amount::from_u64(30);

        assert_eq!(a.checked_add(&b), Some(Amount::from_u64(130)));
        assert_eq!(a.checked_sub(&b), Some(Amount::from_u64(70)));
        assert_eq!(b.checked_sub(&a), None);
    }

    #[test]
    fn test_amount_exceeds_u64() {
        let max = Amount::from_u64(u64::MAX);
        let sum = max.checked_add(&Amount::from_u64(1)).unwrap();
        assert_eq!(sum, Amount::from_u128(u64::MAX as u128 + 1));
    }

    #[test]
    fn test_amount_decimal_roundtrip() {
        let amount = Amount::from_u128(123_456_789_000_000_000_000_000);
        let s = amount.to_decimal_string();
        assert_eq!(Amount::from_decimal_string(&s), Some(amount));
        assert_eq!(Amount::from_decimal_string("not a number"), None);
    }

    #[test]
    fn test_amount_ordering() {
        assert!(Amount::from_u64(5) < Amount::from_u64(6));
        assert!(Amount::zero().is_zero());
        assert!(!Amount::from_u64(1).is_zero());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_decimal_string_round_trips(value in any::<u128>()) {
            let amount = Amount::from_u128(value);
            prop_assert_eq!(
                Amount::from_decimal_string(&amount.to_decimal_string()),
                Some(amount)
            );
        }

        #[test]
        fn prop_sub_inverts_add(a in any::<u64>(), b in any::<u64>()) {
            let a = Amount::from_u64(a);
            let b = Amount::from_u64(b);
            let sum = a.checked_add(&b).unwrap();
            prop_assert_eq!(sum.checked_sub(&b), Some(a));
        }
    }
}
