use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Look-back window of a rate history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum HistoryPeriod {
    #[default]
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
}

impl HistoryPeriod {
    pub const ALL: [HistoryPeriod; 5] = [
        HistoryPeriod::OneMonth,
        HistoryPeriod::ThreeMonths,
        HistoryPeriod::SixMonths,
        HistoryPeriod::OneYear,
        HistoryPeriod::TwoYears,
    ];

    /// The chart `range` value, e.g. `3mo`.
    pub fn as_range(&self) -> &'static str {
        match self {
            HistoryPeriod::OneMonth => "1mo",
            HistoryPeriod::ThreeMonths => "3mo",
            HistoryPeriod::SixMonths => "6mo",
            HistoryPeriod::OneYear => "1y",
            HistoryPeriod::TwoYears => "2y",
        }
    }
}

impl fmt::Display for HistoryPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_range())
    }
}

impl FromStr for HistoryPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        HistoryPeriod::ALL
            .into_iter()
            .find(|p| p.as_range() == wanted)
            .ok_or_else(|| {
                let valid: Vec<_> = HistoryPeriod::ALL.iter().map(|p| p.as_range()).collect();
                format!("unknown period '{s}', expected one of: {}", valid.join(", "))
            })
    }
}

/// Daily close of one currency pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub rate: Decimal,
}

/// Daily closes of `from` priced in `to`, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateHistory {
    pub from: String,
    pub to: String,
    pub period: HistoryPeriod,
    #[serde(rename = "data")]
    pub points: Vec<HistoryPoint>,
}

impl RateHistory {
    pub fn low(&self) -> Option<Decimal> {
        self.points.iter().map(|p| p.rate).min()
    }

    pub fn high(&self) -> Option<Decimal> {
        self.points.iter().map(|p| p.rate).max()
    }

    /// Percentage move from the first to the last close.
    pub fn change_percent(&self) -> Option<Decimal> {
        let first = self.points.first()?.rate;
        let last = self.points.last()?.rate;
        if first.is_zero() {
            return None;
        }
        (last - first)
            .checked_div(first)?
            .checked_mul(Decimal::ONE_HUNDRED)
    }
}
