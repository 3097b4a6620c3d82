//! Cents - Non-negative integer money amount
//!
//! All monetary values in PayGuard are whole cents. Floating point is
//! never used for money; fractional-cent math (percentages) converts
//! through `rust_decimal` at the call site.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when constructing amounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount cannot be negative: {0}")]
    NegativeAmount(i64),
}

/// A non-negative amount of money in whole cents.
///
/// # Invariant
/// The inner value is always >= 0. This is enforced by the constructor.
///
/// # Example
/// ```
/// use payguard_core::Cents;
///
/// let amount = Cents::new(2_500).unwrap();
/// assert_eq!(amount.value(), 2_500);
///
/// // Negative amounts are rejected
/// assert!(Cents::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Cents(i64);

impl Cents {
    /// Zero amount constant
    pub const ZERO: Self = Self(0);

    /// Create a new Cents from a raw cent count.
    ///
    /// Returns an error if the value is negative.
    pub fn new(value: i64) -> Result<Self, AmountError> {
        if value < 0 {
            Err(AmountError::NegativeAmount(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Create a Cents without validation.
    ///
    /// # Safety
    /// The caller MUST ensure the value is non-negative.
    /// Use only for trusted sources (e.g., deserialization from validated storage).
    #[inline]
    pub const fn new_unchecked(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw cent count
    #[inline]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Check if the amount is zero
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition - returns None on overflow
    pub fn checked_add(&self, other: &Cents) -> Option<Cents> {
        self.0.checked_add(other.0).map(Cents)
    }

    /// Checked subtraction - returns None if result would be negative
    pub fn checked_sub(&self, other: &Cents) -> Option<Cents> {
        let result = self.0.checked_sub(other.0)?;
        if result < 0 {
            None
        } else {
            Some(Cents(result))
        }
    }

    /// Signed difference, for balances that are allowed to go negative
    /// (e.g. remaining budget).
    pub fn signed_sub(&self, other: &Cents) -> i64 {
        self.0 - other.0
    }

    /// Convert to a Decimal cent count for exact ratio math
    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Cents {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Cents> for i64 {
    fn from(amount: Cents) -> Self {
        amount.0
    }
}

impl Default for Cents {
    fn default() -> Self {
        Self::ZERO
    }
}
