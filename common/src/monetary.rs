//! Monetary types for SimpleBank.
//!
//! Amounts are stored as signed 64-bit integers in minor currency units
//! (cents for USD). Conversion to a decimal major-unit value is only done
//! for display.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies an account can be opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Twd,
}

impl Currency {
    /// Every supported currency.
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Twd];

    /// Get the ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Twd => "TWD",
        }
    }

    /// Number of minor units in one major unit, as decimal places.
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::Usd | Currency::Eur | Currency::Twd => 2,
        }
    }

    /// Convert an amount in minor units to its major-unit decimal value.
    pub fn to_major(&self, minor_units: i64) -> Decimal {
        Decimal::new(minor_units, self.decimal_places())
    }

    /// Render an amount in minor units, e.g. `-12.50 USD`.
    pub fn format(&self, minor_units: i64) -> String {
        format!("{} {}", self.to_major(minor_units), self.code())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = UnknownCurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "TWD" => Ok(Currency::Twd),
            _ => Err(UnknownCurrencyError(s.to_string())),
        }
    }
}

/// Error returned when parsing a currency code outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCurrencyError(pub String);

impl fmt::Display for UnknownCurrencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported currency: {}", self.0)
    }
}

impl std::error::Error for UnknownCurrencyError {}
