use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;

/// Signed amount in the minor unit of its currency.
pub type Amount = i64;

/// Largest amount a single transaction, share or tax line may carry.
///
/// Aggregates sum many of these, so the ceiling leaves room for about
/// ninety thousand maximal transactions on one report before `i64` runs out.
pub const MAX_AMOUNT: Amount = 100_000_000_000_000;

/// ISO 4217 currency code.
///
/// Amounts throughout the crate are signed integers in the minor unit of
/// their currency (cents for USD). The currency only matters when two
/// amounts meet: aggregates are never summed across currencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    #[must_use]
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of minor-unit digits (2 for USD, 0 for JPY).
    #[must_use]
    pub fn decimals(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "HUF" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
            _ => 2,
        }
    }

    /// Render a minor-unit amount for messages, e.g. `USD 42.50`.
    #[must_use]
    pub fn format(&self, amount: Amount) -> String {
        let decimals = self.decimals();
        let sign = if amount < 0 { "-" } else { "" };
        let magnitude = amount.unsigned_abs();
        if decimals == 0 {
            return format!("{sign}{} {magnitude}", self.0);
        }
        let scale = 10_u64.pow(decimals);
        format!(
            "{sign}{} {}.{:0width$}",
            self.0,
            magnitude / scale,
            magnitude % scale,
            width = decimals as usize
        )
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(ParseEnumError {
                expected: "currency",
                got: s.to_string(),
            })
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}
