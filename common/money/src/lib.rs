use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Normalize a monetary value to 2 decimal places. Extra precision is truncated, never rounded.
pub fn normalize_scale(value: &BigDecimal) -> BigDecimal {
    value.with_scale(2)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount is not a decimal number: {0}")]
    Malformed(String),
    #[error("amount must be greater than zero, got {0}")]
    NotPositive(String),
    #[error("amount has more than two decimal places: {0}")]
    TooPrecise(String),
}

/// Exact two-decimal amount. Serialized as a string (`"10.00"`) so no float ever touches it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd)]
#[serde(from = "BigDecimal", into = "BigDecimal")]
pub struct Money(BigDecimal);

impl Money {
    pub fn new(raw: BigDecimal) -> Self {
        Self(normalize_scale(&raw))
    }

    /// Parse and require a strictly positive value after normalization.
    pub fn positive(raw: &str) -> Result<Self, MoneyError> {
        let money: Money = raw.parse()?;
        if money.is_positive() {
            Ok(money)
        } else {
            Err(MoneyError::NotPositive(money.to_string()))
        }
    }

    pub fn is_positive(&self) -> bool {
        self.0 > BigDecimal::from(0i64)
    }

    pub fn inner(&self) -> &BigDecimal {
        &self.0
    }
}

impl From<BigDecimal> for Money {
    fn from(value: BigDecimal) -> Self {
        Self::new(value)
    }
}

impl From<Money> for BigDecimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let raw = BigDecimal::from_str(trimmed).map_err(|_| MoneyError::Malformed(trimmed.to_string()))?;
        // Trailing zeros are fine ("10.000"); dropping real digits is not.
        if normalize_scale(&raw) != raw {
            return Err(MoneyError::TooPrecise(trimmed.to_string()));
        }
        Ok(Money::new(raw))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
