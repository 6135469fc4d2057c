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

const NAME: &str = "ecb";

/// ECB reference rates in the exchangerate.host format:
/// `GET /latest?base=EUR` answering `{"base": "EUR", "rates": {...}}`.
pub struct EcbProvider {
    base_url: String,
    retries: usize,
    client: reqwest::Client,
}

impl EcbProvider {
    pub fn new(base_url: &str, retries: usize) -> anyhow::Result<Self> {
        Ok(EcbProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            retries,
            client: http_client()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EcbResponse {
    success: Option<bool>,
    base: Option<String>,
    rates: Option<BTreeMap<String, Decimal>>,
}

#[async_trait]
impl RateProvider for EcbProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(name = "EcbRatesFetch", skip(self), fields(base = %base))]
    async fn fetch(&self, base: &str) -> Result<RateTable, RateError> {
        let url = format!("{}/latest?base={}", self.base_url, base);
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

        let text = response
            .text()
            .await
            .map_err(|e| RateError::request(NAME, e))?;
        let data: EcbResponse = serde_json::from_str(&text).map_err(|e| {
            RateError::invalid_response(NAME, format!("Failed to parse JSON response: {e}"))
        })?;

        if data.success == Some(false) {
            return Err(RateError::invalid_response(NAME, "API reported failure"));
        }
        let reported_base = data
            .base
            .map(|b| normalize_code(&b))
            .ok_or_else(|| RateError::invalid_response(NAME, "Missing base currency"))?;
        let raw = data
            .rates
            .ok_or_else(|| RateError::invalid_response(NAME, "Missing rates"))?;

        let rates = collect_rates(NAME, &reported_base, raw);
        Ok(RateTable::new(reported_base, rates, Utc::now(), NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn create_mock_server(status: u16, mock_response: &str) -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("base", "EUR"))
            .respond_with(ResponseTemplate::new(status).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        mock_server
    }

    #[tokio::test]
    async fn test_successful_rates_fetch() {
        let mock_response = r#"{
            "success": true,
            "base": "EUR",
            "date": "2024-05-01",
            "rates": {"USD": 1.0842, "JPY": 161.23, "GBP": 0.8541}
        }"#;
        let mock_server = create_mock_server(200, mock_response).await;

        let provider = EcbProvider::new(&mock_server.uri(), 0).unwrap();
        let table = provider.fetch("EUR").await.unwrap();

        assert_eq!(table.base, "EUR");
        assert_eq!(table.source, "ecb");
        assert_eq!(table.rate("USD"), Some(dec!(1.0842)));
        assert_eq!(table.rate("JPY"), Some(dec!(161.23)));
        assert_eq!(table.rate("EUR"), Some(dec!(1)));
        assert!(table.validate().is_ok());
    }

    #[tokio::test]
    async fn test_api_failure_payload() {
        let mock_response =
            r#"{"success": false, "error": {"code": 101, "type": "missing_access_key"}}"#;
        let mock_server = create_mock_server(200, mock_response).await;

        let provider = EcbProvider::new(&mock_server.uri(), 0).unwrap();
        let err = provider.fetch("EUR").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Provider ecb returned an invalid response: API reported failure"
        );
    }

    #[tokio::test]
    async fn test_missing_rates() {
        let mock_server = create_mock_server(200, r#"{"base": "EUR"}"#).await;

        let provider = EcbProvider::new(&mock_server.uri(), 0).unwrap();
        let err = provider.fetch("EUR").await.unwrap_err();

        assert_eq!(err, RateError::invalid_response("ecb", "Missing rates"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let mock_server = create_mock_server(500, "").await;

        let provider = EcbProvider::new(&mock_server.uri(), 0).unwrap();
        let err = provider.fetch("EUR").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Provider ecb returned an invalid response: HTTP error: 500 Internal Server Error"
        );
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mock_server = create_mock_server(200, r#"{"base": "EUR", "rates": [1, 2]}"#).await;

        let provider = EcbProvider::new(&mock_server.uri(), 0).unwrap();
        let err = provider.fetch("EUR").await.unwrap_err();

        assert!(err.to_string().contains("Failed to parse JSON response"));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let provider = EcbProvider::new("http://127.0.0.1:1", 0).unwrap();
        let err = provider.fetch("EUR").await.unwrap_err();

        assert!(matches!(err, RateError::ProviderRequest { .. }));
    }
}
