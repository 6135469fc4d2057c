use crate::core::rates::{is_currency_code, normalize_code};
use anyhow::Error;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const USER_AGENT: &str = concat!("fxc/", env!("CARGO_PKG_VERSION"));
pub const RETRY_DELAY_MS: u64 = 250;

/// Builds the HTTP client shared by a provider's requests
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().user_agent(USER_AGENT).build()
}

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// Either the successful result or the error after all attempts
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await.map_err(anyhow::Error::from) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// Turns a provider's raw rate map into table form: codes upper-cased,
/// malformed codes dropped and the base identity present.
///
/// When several raw keys upper-case to the same code, the first in key order
/// wins, so an already upper-cased key beats its lower-case variants.
pub fn collect_rates(
    provider: &str,
    base: &str,
    raw: BTreeMap<String, Decimal>,
) -> BTreeMap<String, Decimal> {
    let mut rates = BTreeMap::new();
    for (code, rate) in raw {
        let code = normalize_code(&code);
        if !is_currency_code(&code) {
            debug!(provider, code = %code, "Skipping malformed currency code");
            continue;
        }
        match rates.entry(code) {
            Entry::Vacant(entry) => {
                entry.insert(rate);
            }
            Entry::Occupied(entry) => {
                debug!(provider, code = %entry.key(), "Skipping duplicate currency code");
            }
        }
    }
    rates.entry(base.to_string()).or_insert(Decimal::ONE);
    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_collect_rates_normalizes_codes() {
        let raw = BTreeMap::from([
            ("usd".to_string(), dec!(1.1)),
            ("JPY".to_string(), dec!(160)),
            ("BITCOIN".to_string(), dec!(0.00001)),
        ]);

        let rates = collect_rates("test", "EUR", raw);

        assert_eq!(rates.len(), 3);
        assert_eq!(rates["USD"], dec!(1.1));
        assert_eq!(rates["JPY"], dec!(160));
        assert_eq!(rates["EUR"], dec!(1));
    }

    #[test]
    fn test_collect_rates_keeps_reported_base_rate() {
        let raw = BTreeMap::from([("EUR".to_string(), dec!(0.98))]);
        let rates = collect_rates("test", "EUR", raw);
        assert_eq!(rates["EUR"], dec!(0.98));
    }

    #[test]
    fn test_collect_rates_prefers_upper_case_duplicate() {
        let raw = BTreeMap::from([
            ("usd".to_string(), dec!(9.9)),
            ("USD".to_string(), dec!(1.1)),
            ("Usd".to_string(), dec!(8.8)),
        ]);

        let rates = collect_rates("test", "EUR", raw);

        assert_eq!(rates.len(), 2);
        assert_eq!(rates["USD"], dec!(1.1));
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_retries() {
        let attempts = AtomicUsize::new(0);
        let client = http_client().unwrap();

        let result = with_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                client.get("http://127.0.0.1:1/unreachable").send()
            },
            2,
            1,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
