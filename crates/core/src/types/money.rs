//! Fixed-point monetary amount.
//!
//! [`Money`] stores an amount in minor units (hundredths) so that line totals
//! and order totals add up exactly. On the wire the Order Store speaks plain
//! JSON numbers (`450.0`), so serde goes through `f64` at the boundary only.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul};

use serde::{Deserialize, Serialize};

/// Number of decimal places carried by [`Money`].
pub const MONEY_SCALE: u32 = 2;

const MINOR_PER_UNIT: i64 = 10i64.pow(MONEY_SCALE);

/// Monetary amount in minor units.
///
/// # Examples
///
/// ```
/// use kb_core::types::Money;
///
/// let price = Money::from_minor(45_050); // 450.50
/// assert_eq!(price.to_string(), "450.50");
/// assert_eq!((price * 2).minor(), 90_100);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Money {
    minor: i64,
}

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money { minor: 0 };

    /// Create an amount from minor units (hundredths).
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Self { minor }
    }

    /// Create an amount from whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Self {
            minor: units.saturating_mul(MINOR_PER_UNIT),
        }
    }

    /// Raw minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.minor
    }

    /// Returns `true` if the amount is below zero.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.minor < 0
    }

    /// Convert to `f64`. Display and serialization only.
    #[inline]
    pub fn to_f64(&self) -> f64 {
        self.minor as f64 / MINOR_PER_UNIT as f64
    }
}

/// Error returned when a wire number cannot be represented as [`Money`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("amount {0} is not a representable monetary value")]
pub struct MoneyRangeError(pub f64);

impl TryFrom<f64> for Money {
    type Error = MoneyRangeError;

    /// Round to the nearest minor unit.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let scaled = (value * MINOR_PER_UNIT as f64).round();
        if !scaled.is_finite() || scaled.abs() > i64::MAX as f64 {
            return Err(MoneyRangeError(value));
        }
        Ok(Self {
            minor: scaled as i64,
        })
    }
}

impl From<Money> for f64 {
    fn from(value: Money) -> Self {
        value.to_f64()
    }
}

impl fmt::Debug for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Money({self})")
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        let unit = MINOR_PER_UNIT.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:0>width$}",
            abs / unit,
            abs % unit,
            width = MONEY_SCALE as usize
        )
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            minor: self.minor.saturating_add(rhs.minor),
        }
    }
}

impl Mul<u32> for Money {
    type Output = Self;

    /// Line total: unit price times quantity.
    #[inline]
    fn mul(self, rhs: u32) -> Self::Output {
        Self {
            minor: self.minor.saturating_mul(i64::from(rhs)),
        }
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}
