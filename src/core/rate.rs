//! Rate keys, records, provider snapshots and monetary amounts

use crate::core::error::{RateError, RateResult};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt::Display;

/// Normalises a currency code to upper case and checks it is three ASCII letters.
pub fn normalize_currency(code: &str) -> RateResult<String> {
    let code = code.trim().to_ascii_uppercase();
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(code)
    } else {
        Err(RateError::UnknownCurrency(code))
    }
}

/// Formats a rate as a locale-independent decimal string that parses back to
/// the same `f64`.
pub fn format_rate(rate: f64) -> String {
    format!("{rate}")
}

/// Parses a stored rate, rejecting anything that is not a positive finite number.
pub fn parse_rate(text: &str) -> RateResult<f64> {
    let rate: f64 = text
        .trim()
        .parse()
        .map_err(|e| RateError::CacheIo(format!("Corrupted rate record {text:?}: {e}")))?;
    if is_valid_rate(rate) {
        Ok(rate)
    } else {
        Err(RateError::CacheIo(format!("Invalid stored rate: {text}")))
    }
}

pub fn is_valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

/// Identity of one cached rate: the rate for converting `base` into `quote`
/// on `date`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateKey {
    date: NaiveDate,
    base: String,
    quote: String,
}

impl RateKey {
    pub fn new(date: NaiveDate, base: &str, quote: &str) -> RateResult<Self> {
        Ok(Self {
            date,
            base: normalize_currency(base)?,
            quote: normalize_currency(quote)?,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// The ISO `YYYY-MM-DD` form of the date, as used in storage keys and
    /// provider URLs.
    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.date_string(), self.base, self.quote)
    }
}

/// A cached rate. The rate is always strictly positive and finite.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRecord {
    pub key: RateKey,
    pub rate: f64,
}

impl RateRecord {
    pub fn new(key: RateKey, rate: f64) -> RateResult<Self> {
        if !is_valid_rate(rate) {
            return Err(RateError::MalformedResponse(format!(
                "Refusing to cache invalid rate {rate} for {key}"
            )));
        }
        Ok(Self { key, rate })
    }
}

/// All rates reported by one provider response, relative to `base`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    pub base: String,
    pub rates: HashMap<String, f64>,
}

impl ProviderSnapshot {
    /// Rate of `code` relative to the snapshot base.
    pub fn rate_for(&self, code: &str) -> RateResult<f64> {
        match self.rates.get(code) {
            Some(rate) if is_valid_rate(*rate) => Ok(*rate),
            Some(rate) => Err(RateError::MalformedResponse(format!(
                "Provider reported invalid rate {rate} for {code}"
            ))),
            None if code == self.base => Ok(1.0),
            None => Err(RateError::UnknownCurrency(code.to_string())),
        }
    }

    /// Derives the `from -> to` rate through the snapshot base.
    pub fn cross_rate(&self, from: &str, to: &str) -> RateResult<f64> {
        let from_to_base = if from == self.base {
            1.0
        } else {
            1.0 / self.rate_for(from)?
        };
        let base_to_to = if to == self.base {
            1.0
        } else {
            self.rate_for(to)?
        };
        Ok(from_to_base * base_to_to)
    }
}

/// An amount of money in a currency on a calendar date.
#[derive(Debug, Clone, PartialEq)]
pub struct MonetaryAmount {
    pub value: f64,
    pub currency: String,
    pub date: NaiveDate,
}

/// Result of converting one element of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    Converted(MonetaryAmount),
    Failed { index: usize, error: RateError },
}

impl ConversionOutcome {
    pub fn converted(&self) -> Option<&MonetaryAmount> {
        match self {
            ConversionOutcome::Converted(amount) => Some(amount),
            ConversionOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConversionOutcome::Failed { .. })
    }
}
