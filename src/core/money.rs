//! Two-currency monetary amounts
//!
//! Amounts are always carried as a pair: the primary currency the prices are
//! entered in and a secondary currency derived from it with a fixed rate the
//! caller supplies. Both halves are fixed-point decimals rounded to cents.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::Add;

/// Number of decimal places stored for every amount (`DECIMAL(12,2)`)
pub const MONEY_SCALE: u32 = 2;

/// Largest amount a `DECIMAL(12,2)` column holds: 9 999 999 999.99
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, MONEY_SCALE);

/// Round to the stored scale, halves away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Fixed conversion between the primary and the secondary currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// Secondary currency units per one primary unit
    pub secondary_per_primary: Decimal,
}

impl ExchangeRate {
    pub fn new(secondary_per_primary: Decimal) -> Self {
        Self {
            secondary_per_primary,
        }
    }

    /// Rate of one, for single-currency setups
    pub fn identity() -> Self {
        Self::new(Decimal::ONE)
    }

    /// Only strictly positive rates can price an order
    pub fn is_positive(&self) -> bool {
        self.secondary_per_primary > Decimal::ZERO
    }

    /// Build a pair from a primary amount
    ///
    /// Panics on decimal overflow; inputs that passed `NewOrder::check` are
    /// bounded well below it. Use [`ExchangeRate::checked_pair`] otherwise.
    pub fn pair(&self, primary: Decimal) -> MoneyPair {
        let primary = round_money(primary);
        MoneyPair {
            primary,
            secondary: round_money(primary * self.secondary_per_primary),
        }
    }

    pub fn checked_pair(&self, primary: Decimal) -> Option<MoneyPair> {
        let primary = round_money(primary);
        let secondary = primary.checked_mul(self.secondary_per_primary)?;
        Some(MoneyPair {
            primary,
            secondary: round_money(secondary),
        })
    }
}

impl Default for ExchangeRate {
    fn default() -> Self {
        Self::identity()
    }
}

/// An amount expressed in both currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MoneyPair {
    pub primary: Decimal,
    pub secondary: Decimal,
}

impl MoneyPair {
    pub const ZERO: MoneyPair = MoneyPair {
        primary: Decimal::ZERO,
        secondary: Decimal::ZERO,
    };

    pub fn new(primary: Decimal, secondary: Decimal) -> Self {
        Self { primary, secondary }
    }

    /// Multiply both halves by a quantity
    ///
    /// Each currency is multiplied on its own so a line total is exactly
    /// `unit × quantity` in both columns, with no re-conversion drift.
    pub fn times(&self, quantity: u32) -> MoneyPair {
        let q = Decimal::from(quantity);
        MoneyPair {
            primary: self.primary * q,
            secondary: self.secondary * q,
        }
    }

    pub fn checked_times(&self, quantity: u32) -> Option<MoneyPair> {
        let q = Decimal::from(quantity);
        Some(MoneyPair {
            primary: self.primary.checked_mul(q)?,
            secondary: self.secondary.checked_mul(q)?,
        })
    }

    pub fn checked_add(&self, rhs: MoneyPair) -> Option<MoneyPair> {
        Some(MoneyPair {
            primary: self.primary.checked_add(rhs.primary)?,
            secondary: self.secondary.checked_add(rhs.secondary)?,
        })
    }

    /// Both halves fit a `DECIMAL(12,2)` column
    pub fn fits_column(&self) -> bool {
        !self.is_negative() && self.primary <= MAX_AMOUNT && self.secondary <= MAX_AMOUNT
    }

    /// Apply a proportional rate (e.g. commission) to both halves
    pub fn scale(&self, rate: Decimal) -> MoneyPair {
        MoneyPair {
            primary: round_money(self.primary * rate),
            secondary: round_money(self.secondary * rate),
        }
    }

    pub fn is_negative(&self) -> bool {
        self.primary < Decimal::ZERO || self.secondary < Decimal::ZERO
    }
}

impl Add for MoneyPair {
    type Output = MoneyPair;

    fn add(self, rhs: MoneyPair) -> MoneyPair {
        MoneyPair {
            primary: self.primary + rhs.primary,
            secondary: self.secondary + rhs.secondary,
        }
    }
}

impl Sum for MoneyPair {
    fn sum<I: Iterator<Item = MoneyPair>>(iter: I) -> MoneyPair {
        iter.fold(MoneyPair::ZERO, Add::add)
    }
}
