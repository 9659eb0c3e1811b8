//! Type-safe price representation using decimal arithmetic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., dollars, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Net line total: `(unit_price - discount) * quantity`.
    ///
    /// The discount is clamped to the unit price so a line never goes negative.
    #[must_use]
    pub fn line_total(unit_price: Decimal, discount: Decimal, quantity: u32) -> Decimal {
        let discount = discount.max(Decimal::ZERO).min(unit_price);
        (unit_price - discount) * Decimal::from(quantity)
    }
}

/// Error parsing a currency code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported currency code: {0}")]
pub struct CurrencyError(pub String);

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
    NGN,
}

impl CurrencyCode {
    /// The ISO 4217 code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
            Self::NGN => "NGN",
        }
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            "NGN" => Ok(Self::NGN),
            _ => Err(CurrencyError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total_applies_discount() {
        let total = Price::line_total(Decimal::new(1000, 2), Decimal::new(250, 2), 3);
        assert_eq!(total, Decimal::new(2250, 2));
    }

    #[test]
    fn test_line_total_clamps_discount_to_price() {
        let total = Price::line_total(Decimal::new(500, 2), Decimal::new(900, 2), 2);
        assert_eq!(total, Decimal::ZERO);
    }

    #[test]
    fn test_currency_round_trips_through_display() {
        for code in ["usd", "EUR", " gbp "] {
            let parsed: CurrencyCode = code.parse().unwrap_or_default();
            assert_eq!(parsed.to_string(), code.trim().to_ascii_uppercase());
        }
        assert!("XYZ".parse::<CurrencyCode>().is_err());
    }
}
