//! Money in minor currency units and the flat sales-tax rate.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Amount in the smallest currency unit (e.g. cents).
pub type Cents = u64;

/// Flat tax rate expressed in basis points (1300 = 13%).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Upper bound: 100%.
    pub const MAX_BPS: u32 = 10_000;

    pub fn from_bps(bps: u32) -> Result<Self, DomainError> {
        if bps > Self::MAX_BPS {
            return Err(DomainError::validation(format!(
                "tax rate {bps} bps exceeds {} bps",
                Self::MAX_BPS
            )));
        }
        Ok(Self(bps))
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    /// Tax owed on `subtotal`, rounded half-up to the nearest minor unit.
    pub fn tax_on(&self, subtotal: Cents) -> Cents {
        let scaled = u128::from(subtotal) * u128::from(self.0);
        ((scaled + 5_000) / 10_000) as Cents
    }

    /// Decimal rendering used in API responses (e.g. "0.13").
    pub fn as_decimal_string(&self) -> String {
        let whole = self.0 / 10_000;
        let frac = self.0 % 10_000;
        let frac = format!("{frac:04}");
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            format!("{whole}.0")
        } else {
            format!("{whole}.{frac}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirteen_percent_of_two_hundred() {
        let rate = TaxRate::from_bps(1300).unwrap();
        assert_eq!(rate.tax_on(20_000), 2_600);
    }

    #[test]
    fn rounds_half_up() {
        let rate = TaxRate::from_bps(1300).unwrap();
        // 0.13 * 0.50 = 0.065 -> 0.07
        assert_eq!(rate.tax_on(50), 7);
        // 0.13 * 0.10 = 0.013 -> 0.01
        assert_eq!(rate.tax_on(10), 1);
    }

    #[test]
    fn rejects_rates_over_one_hundred_percent() {
        assert!(TaxRate::from_bps(10_001).is_err());
    }

    #[test]
    fn renders_decimal() {
        assert_eq!(TaxRate::from_bps(1300).unwrap().as_decimal_string(), "0.13");
        assert_eq!(TaxRate::from_bps(825).unwrap().as_decimal_string(), "0.0825");
        assert_eq!(TaxRate::from_bps(0).unwrap().as_decimal_string(), "0.0");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: tax never exceeds the subtotal and is monotonic in it.
            #[test]
            fn tax_is_bounded_and_monotonic(
                bps in 0u32..=10_000,
                a in 0u64..10_000_000_000,
                b in 0u64..10_000_000_000,
            ) {
                let rate = TaxRate::from_bps(bps).unwrap();
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                prop_assert!(rate.tax_on(lo) <= lo);
                prop_assert!(rate.tax_on(lo) <= rate.tax_on(hi));
            }
        }
    }
}
