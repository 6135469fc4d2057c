//! Exchange rate tables and their invariants

use super::error::RateError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Returns true if `code` looks like an ISO 4217 code: three uppercase ASCII letters.
pub fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Normalizes user or provider input into a currency code candidate.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// A complete set of exchange rates relative to one base currency.
///
/// One unit of `base` buys `rates[code]` units of `code`. Tables are replaced
/// wholesale on refresh and never mutated after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    pub base: String,
    pub rates: BTreeMap<String, Decimal>,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

impl RateTable {
    pub fn new(
        base: impl Into<String>,
        rates: BTreeMap<String, Decimal>,
        fetched_at: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into(),
            rates,
            fetched_at,
            source: source.into(),
        }
    }

    pub fn rate(&self, code: &str) -> Option<Decimal> {
        self.rates.get(code).copied()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rates.contains_key(code)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    /// A table is fresh while its age is strictly below `max_age`. A table
    /// stamped in the future is never fresh.
    pub fn is_fresh(&self, max_age: std::time::Duration, now: DateTime<Utc>) -> bool {
        let age = self.age(now);
        if age < Duration::zero() {
            return false;
        }
        match Duration::from_std(max_age) {
            Ok(max_age) => age < max_age,
            // Larger than chrono can represent, so nothing is ever too old.
            Err(_) => true,
        }
    }

    /// Checks the table invariants: non-empty, well-formed codes, strictly
    /// positive rates and an exact identity entry for the base currency.
    pub fn validate(&self) -> Result<(), RateError> {
        if !is_currency_code(&self.base) {
            return Err(RateError::InvalidTable(format!(
                "base currency '{}' is not a 3-letter uppercase code",
                self.base
            )));
        }
        if self.rates.is_empty() {
            return Err(RateError::InvalidTable("rate map is empty".to_string()));
        }
        if let Some(code) = self.rates.keys().find(|code| !is_currency_code(code)) {
            return Err(RateError::InvalidTable(format!(
                "currency code '{code}' is not a 3-letter uppercase code"
            )));
        }
        if let Some((code, rate)) = self.rates.iter().find(|(_, rate)| **rate <= Decimal::ZERO) {
            return Err(RateError::InvalidTable(format!(
                "rate for {code} is not positive: {rate}"
            )));
        }
        match self.rates.get(&self.base) {
            Some(rate) if *rate == Decimal::ONE => Ok(()),
            Some(rate) => Err(RateError::InvalidTable(format!(
                "base currency {} has rate {rate}, expected 1",
                self.base
            ))),
            None => Err(RateError::InvalidTable(format!(
                "base currency {} is missing from the rate map",
                self.base
            ))),
        }
    }

    /// Re-expresses the table relative to `target`.
    ///
    /// `rate_in_target[code] = rate[code] / rate[target]`. Fails if `target`
    /// is not in the table; the timestamp and source are carried over.
    pub fn rebase(&self, target: &str) -> Result<RateTable, RateError> {
        if self.base == target {
            return Ok(self.clone());
        }
        let pivot = self
            .rate(target)
            .ok_or_else(|| RateError::UnknownCurrency(target.to_string()))?;
        if pivot <= Decimal::ZERO {
            return Err(RateError::InvalidTable(format!(
                "rate for {target} is not positive: {pivot}"
            )));
        }

        let mut rates = BTreeMap::new();
        for (code, rate) in &self.rates {
            let rebased = if code == target {
                Decimal::ONE
            } else {
                rate.checked_div(pivot).ok_or_else(|| {
                    RateError::InvalidTable(format!("re-basing {code} to {target} overflowed"))
                })?
            };
            rates.insert(code.clone(), rebased);
        }

        Ok(RateTable {
            base: target.to_string(),
            rates,
            fetched_at: self.fetched_at,
            source: self.source.clone(),
        })
    }
}
