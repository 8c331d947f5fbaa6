use std::fmt;

use serde::{Deserialize, Serialize};

/// Monetary amount in currency minor units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(minor_units: i64) -> Self {
        Amount(minor_units)
    }

    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `None` on overflow.
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// `None` on overflow.
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_preserves_minor_units() {
        assert_eq!(Amount::new(12_345).minor_units(), 12_345);
    }

    #[test]
    fn display_is_plain_integer() {
        assert_eq!(Amount::new(190).to_string(), "190");
        assert_eq!(Amount::new(0).to_string(), "0");
        assert_eq!(Amount::new(-5).to_string(), "-5");
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(Amount::default(), Amount::ZERO);
    }

    #[test]
    fn sign_checks() {
        assert!(Amount::new(1).is_positive());
        assert!(!Amount::ZERO.is_positive());
        assert!(!Amount::ZERO.is_negative());
        assert!(Amount::new(-1).is_negative());
    }

    #[test]
    fn checked_add() {
        assert_eq!(
            Amount::new(100).checked_add(Amount::new(50)),
            Some(Amount::new(150))
        );
        assert_eq!(Amount::new(i64::MAX).checked_add(Amount::new(1)), None);
    }

    #[test]
    fn checked_sub() {
        assert_eq!(
            Amount::new(100).checked_sub(Amount::new(30)),
            Some(Amount::new(70))
        );
        assert_eq!(Amount::new(i64::MIN).checked_sub(Amount::new(1)), None);
    }

    #[test]
    fn ordering() {
        let small = Amount::new(100);
        let large = Amount::new(200);
        assert!(small < large);
        assert!(Amount::new(-1) < Amount::ZERO);
    }
}
