//! Trading pair identifiers (§3).
//!
//! The internal canonical form is `BASE-QUOTE` (e.g. `BTC-USDT`); exchange-facing
//! code speaks `BASE/QUOTE`. Conversion between the two is purely textual.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// A validated `BASE-QUOTE` trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairId {
    base: String,
    quote: String,
}

impl PairId {
    /// Parses the API-facing `BASE/QUOTE` form (as used by `/candlestick/historical`).
    pub fn from_api_form(s: &str) -> Result<Self, CoreError> {
        Self::split_on(s, '/')
    }

    /// Parses the canonical `BASE-QUOTE` form (as used by `/data/candles`).
    pub fn from_canonical(s: &str) -> Result<Self, CoreError> {
        Self::split_on(s, '-')
    }

    fn split_on(s: &str, sep: char) -> Result<Self, CoreError> {
        let (base, quote) = s.split_once(sep).ok_or_else(|| {
            CoreError::Validation(format!("malformed pair '{s}': expected BASE{sep}QUOTE"))
        })?;
        if base.is_empty() || quote.is_empty() {
            return Err(CoreError::Validation(format!("malformed pair '{s}'")));
        }
        Ok(PairId {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        })
    }

    /// The canonical `BASE-QUOTE` form, as stored in the database.
    pub fn canonical(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    /// The exchange-facing `BASE/QUOTE` form.
    pub fn api_form(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// The exchange wire symbol with no separator (e.g. `BTCUSDT`), as most
    /// exchange REST/WS APIs expect it.
    pub fn exchange_symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl FromStr for PairId {
    type Err = CoreError;

    /// Accepts either separator so callers that already have a canonical or
    /// API-form string on hand don't need to know which.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('-') {
            Self::from_canonical(s)
        } else if s.contains('/') {
            Self::from_api_form(s)
        } else {
            Err(CoreError::Validation(format!(
                "malformed pair '{s}': expected BASE-QUOTE or BASE/QUOTE"
            )))
        }
    }
}
