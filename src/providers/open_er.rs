use super::util::{RETRY_DELAY_MS, collect_rates, http_client, with_retry};
use crate::core::error::RateError;
use crate::core::provider::RateProvider;
use crate::core::rates::{RateTable, normalize_code};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const NAME: &str = "open_er";

/// Open exchange rate API: `GET /v6/latest/{base}`.
pub struct OpenErProvider {
    base_url: String,
    retries: usize,
    client: reqwest::Client,
}

impl OpenErProvider {
    pub fn new(base_url: &str, retries: usize) -> anyhow::Result<Self> {
        Ok(OpenErProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            retries,
            client: http_client()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenErResponse {
    result: String,
    base_code: Option<String>,
    #[serde(default)]
    rates: BTreeMap<String, Decimal>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
}

#[async_trait]
impl RateProvider for OpenErProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(name = "OpenErRatesFetch", skip(self), fields(base = %base))]
    async fn fetch(&self, base: &str) -> Result<RateTable, RateError> {
        let url = format!("{}/v6/latest/{}", self.base_url, base);
        debug!("Requesting rates from {}", url);

        let response = with_retry(|| self.client.get(&url).send(), self.retries, RETRY_DELAY_MS)
            .await
            .map_err(|e| RateError::request(NAME, e))?;

        if !response.status().is_success() {
            return Err(RateError::invalid_response(
                NAME,
                format!("HTTP error: {}", response.status()),
            ));
        }

        let data: OpenErResponse = response.json().await.map_err(|e| {
            RateError::invalid_response(NAME, format!("Failed to parse JSON response: {e}"))
        })?;

        if data.result != "success" {
            let reason = data.error_type.unwrap_or_else(|| data.result.clone());
            return Err(RateError::invalid_response(
                NAME,
                format!("API reported {reason}"),
            ));
        }
        let reported_base = data
            .base_code
            .map(|b| normalize_code(&b))
            .ok_or_else(|| RateError::invalid_response(NAME, "Missing base_code"))?;

        let rates = collect_rates(NAME, &reported_base, data.rates);
        Ok(RateTable::new(reported_base, rates, Utc::now(), NAME))
    }
}
