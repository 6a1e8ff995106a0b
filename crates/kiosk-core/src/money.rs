//! # Money Module
//!
//! Provides the `Money` type for fixed-point monetary values.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  A kiosk UI summing prices as floats:                                   │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌                                   │
//! │                                                                         │
//! │  The same cart on the kiosk and on the central ledger must produce     │
//! │  the SAME total, byte for byte, or reconciliation reports a mismatch.  │
//! │                                                                         │
//! │  OUR SOLUTION: Integer minor units (öre, cents)                         │
//! │    18.95 SEK = 1895 minor units                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kiosk_core::money::Money;
//!
//! let price = Money::from_minor(1895); // 18.95
//! let line = price.checked_mul_quantity(3).unwrap();
//! assert_eq!(line.minor(), 5685);
//! assert_eq!(line.to_string(), "56.85");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (two decimal places).
///
/// The currency itself lives on the transaction record; `Money` is only the
/// amount. Signed so that corrections can be represented, although captured
/// sales are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use kiosk_core::money::Money;
    ///
    /// let price = Money::from_minor(1099);
    /// assert_eq!(price.minor(), 1099);
    /// ```
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Checked addition, `None` on overflow.
    ///
    /// Totals are recomputed from untrusted input, so the sum must not wrap.
    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Checked line extension (unit price × quantity), `None` on overflow.
    ///
    /// ## Example
    /// ```rust
    /// use kiosk_core::money::Money;
    ///
    /// let unit_price = Money::from_minor(299);
    /// assert_eq!(unit_price.checked_mul_quantity(3).unwrap().minor(), 897);
    /// assert!(unit_price.checked_mul_quantity(i64::MAX).is_none());
    /// ```
    #[inline]
    pub fn checked_mul_quantity(self, qty: i64) -> Option<Money> {
        self.0.checked_mul(qty).map(Money)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering (`1234.50`), no currency symbol.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_minor() {
        let money = Money::from_minor(1099);
        assert_eq!(money.minor(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.minor_part(), 99);
    }

    #[test]
    fn test_from_major_minor() {
        assert_eq!(Money::from_major_minor(18, 95).minor(), 1895);
        assert_eq!(Money::from_major_minor(-5, 50).minor(), -550);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_minor(1895).to_string(), "18.95");
        assert_eq!(Money::from_minor(500).to_string(), "5.00");
        assert_eq!(Money::from_minor(-550).to_string(), "-5.50");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn test_sum_of_extensions() {
        let total: Money = [
            Money::from_minor(3790),
            Money::from_minor(2500),
        ]
        .into_iter()
        .sum();
        assert_eq!(total.minor(), 6290);
    }

    #[test]
    fn test_checked_overflow() {
        assert!(Money::from_minor(i64::MAX).checked_add(Money::from_minor(1)).is_none());
        assert!(Money::from_minor(i64::MAX / 2).checked_mul_quantity(3).is_none());
        assert_eq!(
            Money::from_minor(100).checked_mul_quantity(99),
            Some(Money::from_minor(9900))
        );
    }

    #[test]
    fn test_sign_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_minor(1).is_positive());
        assert!(Money::from_minor(-1).is_negative());
    }
}
