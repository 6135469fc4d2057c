use super::util::{RETRY_DELAY_MS, http_client, with_retry};
use crate::core::error::RateError;
use crate::core::history::{HistoryPeriod, HistoryPoint, RateHistory};
use crate::core::provider::RateProvider;
use crate::core::rates::RateTable;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

const NAME: &str = "yahoo";

/// Yahoo Finance quotes, one `{base}{quote}=X` chart request per currency pair.
pub struct YahooProvider {
    base_url: String,
    currencies: Vec<String>,
    retries: usize,
    client: reqwest::Client,
}

impl YahooProvider {
    pub fn new(base_url: &str, currencies: Vec<String>, retries: usize) -> Result<Self> {
        Ok(YahooProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            currencies,
            retries,
            client: http_client()?,
        })
    }

    async fn get_rate(&self, from: &str, to: &str) -> Result<Decimal> {
        let symbol = format!("{from}{to}=X");
        let url = format!("{}/v8/finance/chart/{symbol}", self.base_url);
        debug!("Requesting currency rate from {}", url);

        let response = with_retry(|| self.client.get(&url).send(), self.retries, RETRY_DELAY_MS)
            .await
            .map_err(|e| anyhow!("Request error: {} for currency pair: {}", e, symbol))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for currency pair: {}",
                response.status(),
                symbol
            ));
        }

        let text = response.text().await?;

        let data: YahooCurrencyResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", symbol, e))?;

        let item = data
            .chart
            .result
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No rate data found for currency pair: {}", symbol))?;

        let rate = item.meta.regular_market_price;
        if rate <= Decimal::ZERO {
            return Err(anyhow!("Non-positive rate {} for currency pair: {}", rate, symbol));
        }
        Ok(rate)
    }

    /// Daily closes of `{from}{to}=X` over `period`, oldest first.
    #[instrument(name = "YahooRateHistory", skip(self))]
    pub async fn history(
        &self,
        from: &str,
        to: &str,
        period: HistoryPeriod,
    ) -> Result<RateHistory, RateError> {
        let symbol = format!("{from}{to}=X");
        let url = format!(
            "{}/v8/finance/chart/{symbol}?interval=1d&range={}",
            self.base_url,
            period.as_range()
        );
        debug!("Requesting rate history from {}", url);

        let response = with_retry(|| self.client.get(&url).send(), self.retries, RETRY_DELAY_MS)
            .await
            .map_err(|e| RateError::request(NAME, e))?;

        if !response.status().is_success() {
            return Err(RateError::invalid_response(
                NAME,
                format!(
                    "HTTP error: {} for currency pair: {}",
                    response.status(),
                    symbol
                ),
            ));
        }

        let data: YahooCurrencyResponse = response.json().await.map_err(|e| {
            RateError::invalid_response(
                NAME,
                format!("Failed to parse JSON response for {symbol}: {e}"),
            )
        })?;

        let points = data
            .chart
            .result
            .first()
            .map(extract_daily_closes)
            .unwrap_or_default();
        if points.is_empty() {
            return Err(RateError::invalid_response(
                NAME,
                format!("No historical data found for currency pair: {symbol}"),
            ));
        }

        Ok(RateHistory {
            from: from.to_string(),
            to: to.to_string(),
            period,
            points,
        })
    }
}

/// Pairs chart timestamps with their closes. Missing or non-positive closes
/// are skipped; a repeated day keeps its last close.
fn extract_daily_closes(item: &CurrencyChartItem) -> Vec<HistoryPoint> {
    let (Some(timestamps), Some(closes)) = (
        item.timestamp.as_ref(),
        item.indicators
            .as_ref()
            .and_then(|inds| inds.quote.first())
            .and_then(|q| q.close.as_ref()),
    ) else {
        return Vec::new();
    };

    let mut points: Vec<HistoryPoint> = Vec::new();
    for (ts, close) in timestamps.iter().zip(closes) {
        let Some(date) = Utc.timestamp_opt(*ts, 0).single().map(|dt| dt.date_naive()) else {
            continue;
        };
        let Some(rate) = (*close).filter(|rate| *rate > Decimal::ZERO) else {
            continue;
        };
        match points.last_mut() {
            Some(last) if last.date == date => last.rate = rate,
            _ => points.push(HistoryPoint { date, rate }),
        }
    }
    points
}

#[derive(Debug, Deserialize)]
struct YahooCurrencyResponse {
    chart: CurrencyChartResult,
}

#[derive(Debug, Deserialize)]
struct CurrencyChartResult {
    result: Vec<CurrencyChartItem>,
}

#[derive(Debug, Deserialize)]
struct CurrencyChartItem {
    meta: CurrencyChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
struct CurrencyChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    close: Option<Vec<Option<Decimal>>>,
}

#[async_trait]
impl RateProvider for YahooProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(name = "YahooRatesFetch", skip(self), fields(base = %base))]
    async fn fetch(&self, base: &str) -> Result<RateTable, RateError> {
        let quotes: Vec<&str> = self
            .currencies
            .iter()
            .map(String::as_str)
            .filter(|code| *code != base)
            .collect();
        if quotes.is_empty() {
            return Err(RateError::invalid_response(
                NAME,
                "No quote currencies configured",
            ));
        }

        let results = join_all(quotes.iter().map(|quote| self.get_rate(base, quote))).await;

        let mut rates = BTreeMap::new();
        for (quote, result) in quotes.iter().zip(results) {
            match result {
                Ok(rate) => {
                    rates.insert(quote.to_string(), rate);
                }
                Err(e) => warn!(error = %e, "Skipping currency pair"),
            }
        }
        if rates.is_empty() {
            return Err(RateError::invalid_response(
                NAME,
                "No currency pairs could be fetched",
            ));
        }
        rates.insert(base.to_string(), Decimal::ONE);

        Ok(RateTable::new(base, rates, Utc::now(), NAME))
    }
}
