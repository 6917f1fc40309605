//! Price and quantity newtypes
//!
//! Prices stay in `rust_decimal` from the wire until the store boundary,
//! where the aggregate store's float accumulators take over.

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;

/// Non-negative unit price of a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    /// Create a price, returning None if negative
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            None
        } else {
            Some(Self(value.normalize()))
        }
    }

    /// Float view used by the store's float accumulators
    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }
}

impl FromStr for Price {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s).map_err(|e| DecodeError::InvalidField {
            field: "precio",
            reason: e.to_string(),
        })?;
        Self::try_new(value).ok_or_else(|| DecodeError::InvalidField {
            field: "precio",
            reason: format!("negative price {value}"),
        })
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of units sold in a single sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn new(units: u64) -> Self {
        Self(units)
    }

    /// Create from a signed wire value, returning None if negative
    pub fn try_from_i64(units: i64) -> Option<Self> {
        u64::try_from(units).ok().map(Self)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_from_str() {
        let price = Price::from_str("99.99").unwrap();
        assert_eq!(price.to_string(), "99.99");
        assert!((price.as_f64() - 99.99).abs() < 1e-9);
    }

    #[test]
    fn test_price_normalizes_trailing_zeros() {
        let price = Price::from_str("12.500").unwrap();
        assert_eq!(price.to_string(), "12.5");
    }

    #[test]
    fn test_negative_price_rejected() {
        assert!(Price::try_new(Decimal::new(-1, 0)).is_none());
        assert!(matches!(
            Price::from_str("-3.5"),
            Err(DecodeError::InvalidField { field: "precio", .. })
        ));
    }

    #[test]
    fn test_zero_price_allowed() {
        assert_eq!(Price::try_new(Decimal::ZERO), Some(Price::ZERO));
    }

    #[test]
    fn test_quantity_from_signed() {
        assert_eq!(Quantity::try_from_i64(3), Some(Quantity::new(3)));
        assert_eq!(Quantity::try_from_i64(-1), None);
        assert_eq!(Quantity::new(7).as_f64(), 7.0);
    }
}
