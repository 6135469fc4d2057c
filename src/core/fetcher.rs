//! Best-available exchange rates: fresh from providers, or the last cached table

use super::cache::RateStore;
use super::convert::{self, DEFAULT_DECIMAL_PLACES};
use super::error::RateError;
use super::provider::ProviderSlot;
use super::rates::{RateTable, normalize_code};
use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

type RefreshOutcome = Result<Arc<RateTable>, RateError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    /// Currency every returned table is expressed in
    pub base: String,
    /// Upper bound for a single provider attempt
    pub timeout: Duration,
    /// Fractional digits of amounts returned by [`RateFetcher::convert`]
    pub decimal_places: u32,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            base: "EUR".to_string(),
            timeout: DEFAULT_TIMEOUT,
            decimal_places: DEFAULT_DECIMAL_PLACES,
        }
    }
}

struct InFlight {
    generation: u64,
    refresh: SharedRefresh,
}

struct FetcherState {
    options: FetcherOptions,
    providers: Vec<ProviderSlot>,
    store: Arc<dyn RateStore>,
    current: RwLock<Option<Arc<RateTable>>>,
    in_flight: Mutex<Option<InFlight>>,
    generations: AtomicU64,
}

/// Produces the best available [`RateTable`] and converts amounts with it.
///
/// Cloning is cheap; clones share the in-memory table and the in-flight refresh.
#[derive(Clone)]
pub struct RateFetcher {
    state: Arc<FetcherState>,
}

/// Outcome of a refresh started with [`RateFetcher::refresh_async`].
///
/// The refresh runs to completion whether or not the handle is awaited.
pub struct RefreshHandle {
    refresh: SharedRefresh,
}

impl RefreshHandle {
    pub async fn wait(self) -> Result<Arc<RateTable>, RateError> {
        self.refresh.await
    }
}

impl RateFetcher {
    pub fn new(
        options: FetcherOptions,
        mut providers: Vec<ProviderSlot>,
        store: Arc<dyn RateStore>,
    ) -> Self {
        providers.sort_by_key(|slot| slot.priority);
        debug!(
            base = %options.base,
            providers = ?providers,
            "Created rate fetcher"
        );
        Self {
            state: Arc::new(FetcherState {
                options: FetcherOptions {
                    base: normalize_code(&options.base),
                    ..options
                },
                providers,
                store,
                current: RwLock::new(None),
                in_flight: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn base(&self) -> &str {
        &self.state.options.base
    }

    pub fn decimal_places(&self) -> u32 {
        self.state.options.decimal_places
    }

    /// The in-memory table, if any. Never touches the network or the store.
    pub fn current(&self) -> Option<Arc<RateTable>> {
        self.state.current()
    }

    /// Returns the in-memory table while it is younger than `max_age`,
    /// otherwise refreshes from the providers, falling back to the cache.
    pub async fn get_rates(&self, max_age: Duration) -> Result<Arc<RateTable>, RateError> {
        let current = match self.state.current() {
            Some(table) => Some(table),
            None => self.state.hydrate().await,
        };

        if let Some(table) = current {
            if table.is_fresh(max_age, Utc::now()) {
                debug!(
                    source = %table.source,
                    fetched_at = %table.fetched_at,
                    "Serving rates from memory"
                );
                return Ok(table);
            }
            debug!(fetched_at = %table.fetched_at, "In-memory rates are stale");
        }

        self.refresh().await
    }

    /// Refreshes regardless of freshness, joining an in-flight refresh if one exists.
    pub async fn refresh(&self) -> Result<Arc<RateTable>, RateError> {
        self.start_refresh().await
    }

    /// Starts a refresh on the runtime without waiting for it. Calls made while
    /// a refresh is in flight share that refresh and its outcome.
    pub fn refresh_async(&self) -> RefreshHandle {
        RefreshHandle {
            refresh: self.start_refresh(),
        }
    }

    /// Converts with the in-memory table and quantizes the result.
    pub fn convert(&self, amount: Decimal, src: &str, dst: &str) -> Result<Decimal, RateError> {
        let table = self.state.current().ok_or(RateError::Unavailable)?;
        let exact = convert::convert(amount, &normalize_code(src), &normalize_code(dst), &table)?;
        Ok(convert::quantize(exact, self.state.options.decimal_places))
    }

    /// Joins the in-flight refresh or spawns a new one. The spawned task drives
    /// the attempt, so it completes even if every caller goes away.
    fn start_refresh(&self) -> SharedRefresh {
        let mut slot = self
            .state
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = slot.as_ref() {
            debug!(generation = in_flight.generation, "Joining in-flight refresh");
            return in_flight.refresh.clone();
        }

        let generation = self.state.generations.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        let refresh = async move {
            let outcome = state.run_refresh().await;
            state.finish_refresh(generation);
            outcome
        }
        .boxed()
        .shared();

        debug!(generation, "Starting refresh");
        *slot = Some(InFlight {
            generation,
            refresh: refresh.clone(),
        });
        tokio::spawn(refresh.clone());
        refresh
    }
}

impl FetcherState {
    fn current(&self) -> Option<Arc<RateTable>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, table: Arc<RateTable>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(table);
    }

    /// Installs `candidate` unless the in-memory table is newer, and returns
    /// whichever table won.
    fn adopt(&self, candidate: RateTable) -> Arc<RateTable> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref() {
            if existing.fetched_at > candidate.fetched_at {
                return Arc::clone(existing);
            }
        }
        let candidate = Arc::new(candidate);
        *current = Some(Arc::clone(&candidate));
        candidate
    }

    fn finish_refresh(&self, generation: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|f| f.generation) == Some(generation) {
            *slot = None;
        }
    }

    async fn hydrate(&self) -> Option<Arc<RateTable>> {
        match self.store.load().await {
            Ok(table) => match normalize_table(table, &self.options.base) {
                Ok(table) => Some(self.adopt(table)),
                Err(e) => {
                    debug!(error = %e, "Ignoring cached rates");
                    None
                }
            },
            Err(e) => {
                log_cache_error(&e);
                None
            }
        }
    }

    #[instrument(name = "RateRefresh", skip(self), fields(base = %self.options.base))]
    async fn run_refresh(&self) -> RefreshOutcome {
        for slot in &self.providers {
            match self.try_provider(slot).await {
                Ok(table) => {
                    let table = Arc::new(table);
                    if let Err(e) = self.store.save(&table).await {
                        warn!(error = %e, "Keeping fetched rates in memory only");
                    }
                    self.install(Arc::clone(&table));
                    info!(
                        provider = slot.name(),
                        rates = table.rates.len(),
                        "Fetched fresh rates"
                    );
                    return Ok(table);
                }
                Err(e) => warn!(provider = slot.name(), error = %e, "Provider failed"),
            }
        }

        self.fall_back_to_cache().await
    }

    async fn try_provider(&self, slot: &ProviderSlot) -> Result<RateTable, RateError> {
        let name = slot.name();
        let timeout = self.options.timeout;
        debug!(provider = name, priority = slot.priority, "Trying provider");

        let fetched = tokio::time::timeout(timeout, slot.provider.fetch(&self.options.base))
            .await
            .map_err(|_| RateError::ProviderTimeout {
                provider: name.to_string(),
                timeout_ms: timeout.as_millis(),
            })??;

        normalize_table(fetched, &self.options.base)
            .map_err(|e| RateError::invalid_response(name, e.to_string()))
    }

    async fn fall_back_to_cache(&self) -> RefreshOutcome {
        let cached = match self.store.load().await {
            Ok(table) => normalize_table(table, &self.options.base).ok(),
            Err(e) => {
                log_cache_error(&e);
                None
            }
        };

        match (cached, self.current()) {
            (Some(table), _) => {
                let table = self.adopt(table);
                warn!(
                    source = %table.source,
                    fetched_at = %table.fetched_at,
                    "All providers failed, using cached rates"
                );
                Ok(table)
            }
            (None, Some(table)) => {
                warn!(
                    fetched_at = %table.fetched_at,
                    "All providers failed, keeping in-memory rates"
                );
                Ok(table)
            }
            (None, None) => {
                error!("All providers failed and no cached rates exist");
                Err(RateError::Unavailable)
            }
        }
    }
}

fn log_cache_error(e: &RateError) {
    if e.is_cache_miss() {
        debug!(error = %e, "No usable cached rates");
    } else {
        warn!(error = %e, "Failed to read cached rates");
    }
}

/// Validates `table`, re-bases it to `target` and validates the result.
fn normalize_table(table: RateTable, target: &str) -> Result<RateTable, RateError> {
    table.validate()?;
    if table.base == target {
        return Ok(table);
    }
    let rebased = table.rebase(target).map_err(|e| match e {
        RateError::UnknownCurrency(code) => {
            RateError::InvalidTable(format!("target base currency {code} is missing"))
        }
        other => other,
    })?;
    rebased.validate()?;
    Ok(rebased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::RateProvider;
    use crate::store::MemoryRateStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    struct MockProvider {
        name: String,
        table: Option<RateTable>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn ok(name: &str, base: &str, rates: &[(&str, Decimal)]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                table: Some(table(name, base, rates)),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                table: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                table: Some(table(name, "EUR", &[("EUR", dec!(1)), ("USD", dec!(1.1))])),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch(&self, _base: &str) -> Result<RateTable, RateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.table {
                Some(table) => Ok(RateTable {
                    fetched_at: Utc::now(),
                    ..table.clone()
                }),
                None => Err(RateError::request(&self.name, "connection refused")),
            }
        }
    }

    fn table(source: &str, base: &str, rates: &[(&str, Decimal)]) -> RateTable {
        RateTable::new(
            base,
            rates.iter().map(|(c, r)| (c.to_string(), *r)).collect(),
            Utc::now(),
            source,
        )
    }

    fn eur_rates() -> Vec<(&'static str, Decimal)> {
        vec![("EUR", dec!(1)), ("USD", dec!(1.1)), ("JPY", dec!(160))]
    }

    fn fetcher(providers: Vec<(u32, Arc<MockProvider>)>, store: MemoryRateStore) -> RateFetcher {
        let slots = providers
            .into_iter()
            .map(|(priority, p)| ProviderSlot::new(priority, p as Arc<dyn RateProvider>))
            .collect();
        let options = FetcherOptions {
            timeout: Duration::from_millis(100),
            ..FetcherOptions::default()
        };
        RateFetcher::new(options, slots, Arc::new(store))
    }

    #[tokio::test]
    async fn test_fresh_rates_served_from_memory() {
        let provider = MockProvider::ok("ecb", "EUR", &eur_rates());
        let store = MemoryRateStore::new();
        let fetcher = fetcher(vec![(1, provider.clone())], store.clone());

        let first = fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();
        let second = fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_rates_trigger_refresh() {
        let provider = MockProvider::ok("ecb", "EUR", &eur_rates());
        let fetcher = fetcher(vec![(1, provider.clone())], MemoryRateStore::new());

        fetcher.get_rates(Duration::ZERO).await.unwrap();
        fetcher.get_rates(Duration::ZERO).await.unwrap();

        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_fresh_cache_used_without_network() {
        let provider = MockProvider::ok("ecb", "EUR", &eur_rates());
        let store = MemoryRateStore::with_table(table("cached", "EUR", &eur_rates()));
        let fetcher = fetcher(vec![(1, provider.clone())], store);

        let rates = fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();

        assert_eq!(rates.source, "cached");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_falls_through_to_next_provider_and_rebases() {
        let slow = MockProvider::slow("a", Duration::from_secs(5));
        let usd = MockProvider::ok("b", "USD", &[("USD", dec!(1)), ("EUR", dec!(0.9))]);
        let store = MemoryRateStore::new();
        let fetcher = fetcher(vec![(1, slow.clone()), (2, usd.clone())], store.clone());

        let rates = fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();

        assert_eq!(slow.calls(), 1);
        assert_eq!(usd.calls(), 1);
        assert_eq!(rates.base, "EUR");
        assert_eq!(rates.source, "b");
        assert_eq!(rates.rate("EUR"), Some(dec!(1)));
        assert_eq!(rates.rate("USD").unwrap().round_dp(4), dec!(1.1111));
        assert_eq!(store.load().await.unwrap(), *rates);
    }

    #[tokio::test]
    async fn test_invalid_tables_are_skipped() {
        let bad_identity = MockProvider::ok("a", "EUR", &[("EUR", dec!(0.98)), ("USD", dec!(1.1))]);
        let missing_target = MockProvider::ok("b", "USD", &[("USD", dec!(1)), ("GBP", dec!(0.8))]);
        let non_positive = MockProvider::ok("c", "EUR", &[("EUR", dec!(1)), ("USD", dec!(0))]);
        let empty = MockProvider::ok("d", "EUR", &[]);
        let good = MockProvider::ok("e", "EUR", &eur_rates());
        let fetcher = fetcher(
            vec![
                (1, bad_identity.clone()),
                (2, missing_target.clone()),
                (3, non_positive.clone()),
                (4, empty.clone()),
                (5, good.clone()),
            ],
            MemoryRateStore::new(),
        );

        let rates = fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();

        assert_eq!(rates.source, "e");
        for provider in [&bad_identity, &missing_target, &non_positive, &empty, &good] {
            assert_eq!(provider.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_missing_target_base_is_invalid_response() {
        let store = MemoryRateStore::new();
        let fetcher = fetcher(vec![], store);
        let slot = ProviderSlot::new(
            1,
            MockProvider::ok("b", "USD", &[("USD", dec!(1)), ("GBP", dec!(0.8))]),
        );

        let err = fetcher.state.try_provider(&slot).await.unwrap_err();
        assert!(matches!(
            err,
            RateError::ProviderInvalidResponse { ref provider, .. } if provider == "b"
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_provider_timeout() {
        let fetcher = fetcher(vec![], MemoryRateStore::new());
        let slot = ProviderSlot::new(1, MockProvider::slow("a", Duration::from_secs(5)));

        let err = fetcher.state.try_provider(&slot).await.unwrap_err();
        assert_eq!(
            err,
            RateError::ProviderTimeout {
                provider: "a".to_string(),
                timeout_ms: 100
            }
        );
    }

    #[tokio::test]
    async fn test_providers_tried_in_priority_order() {
        let low = MockProvider::ok("low", "EUR", &eur_rates());
        let high = MockProvider::ok("high", "EUR", &eur_rates());
        let fetcher = fetcher(
            vec![(20, low.clone()), (10, high.clone())],
            MemoryRateStore::new(),
        );

        let rates = fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();

        assert_eq!(rates.source, "high");
        assert_eq!(low.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_providers_fail_returns_cache_with_original_timestamp() {
        let fetched_at = Utc::now() - chrono::Duration::days(3);
        let cached = RateTable {
            fetched_at,
            ..table("ecb", "EUR", &eur_rates())
        };
        let store = MemoryRateStore::with_table(cached);
        let fetcher = fetcher(
            vec![(1, MockProvider::failing("a")), (2, MockProvider::failing("b"))],
            store,
        );

        let rates = fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();

        assert_eq!(rates.fetched_at, fetched_at);
        assert_eq!(rates.source, "ecb");
        assert_eq!(fetcher.convert(dec!(10), "USD", "JPY").unwrap(), dec!(1454.5455));
    }

    #[tokio::test]
    async fn test_all_providers_fail_without_cache_is_unavailable() {
        let fetcher = fetcher(
            vec![
                (1, MockProvider::failing("a")),
                (2, MockProvider::slow("b", Duration::from_secs(5))),
            ],
            MemoryRateStore::new(),
        );

        assert_eq!(
            fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap_err(),
            RateError::Unavailable
        );
        assert!(fetcher.current().is_none());
    }

    #[tokio::test]
    async fn test_save_failure_keeps_rates_in_memory() {
        let store = MemoryRateStore::new();
        store.fail_saves(true);
        let provider = MockProvider::ok("ecb", "EUR", &eur_rates());
        let fetcher = fetcher(vec![(1, provider)], store.clone());

        let rates = fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();

        assert_eq!(rates.source, "ecb");
        assert!(fetcher.current().is_some());
        assert_eq!(store.load().await.unwrap_err(), RateError::CacheNotFound);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_async_shares_one_attempt() {
        let provider = MockProvider::slow("ecb", Duration::from_millis(50));
        let fetcher = fetcher(vec![(1, provider.clone())], MemoryRateStore::new());

        let handles: Vec<_> = (0..5).map(|_| fetcher.refresh_async()).collect();
        let results = futures::future::join_all(handles.into_iter().map(RefreshHandle::wait)).await;

        assert_eq!(provider.calls(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }

        // The slot is released once the attempt completes.
        fetcher.refresh_async().wait().await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_async_runs_without_being_awaited() {
        let provider = MockProvider::ok("ecb", "EUR", &eur_rates());
        let store = MemoryRateStore::new();
        let fetcher = fetcher(vec![(1, provider.clone())], store.clone());

        drop(fetcher.refresh_async());
        for _ in 0..50 {
            if fetcher.current().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(provider.calls(), 1);
        assert_eq!(fetcher.current().unwrap().source, "ecb");
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_completes_after_caller_is_cancelled() {
        let provider = MockProvider::slow("ecb", Duration::from_millis(50));
        let store = MemoryRateStore::new();
        let fetcher = fetcher(vec![(1, provider.clone())], store.clone());

        let rates = fetcher.get_rates(Duration::ZERO);
        let cancelled = tokio::time::timeout(Duration::from_millis(10), rates).await;
        assert!(cancelled.is_err());
        drop(fetcher.refresh_async());

        for _ in 0..50 {
            if fetcher.current().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(provider.calls(), 1);
        assert_eq!(fetcher.current().unwrap().source, "ecb");
        assert_eq!(store.save_count(), 1);

        // The finished attempt released its slot, so the next call starts afresh.
        fetcher.refresh().await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_get_rates_share_one_attempt() {
        let provider = MockProvider::slow("ecb", Duration::from_millis(50));
        let fetcher = fetcher(vec![(1, provider.clone())], MemoryRateStore::new());

        let results =
            futures::future::join_all((0..5).map(|_| fetcher.get_rates(Duration::ZERO))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_convert_requires_rates() {
        let fetcher = fetcher(
            vec![(1, MockProvider::ok("ecb", "EUR", &eur_rates()))],
            MemoryRateStore::new(),
        );

        assert_eq!(
            fetcher.convert(dec!(10), "USD", "JPY").unwrap_err(),
            RateError::Unavailable
        );

        fetcher.get_rates(DEFAULT_MAX_AGE).await.unwrap();
        assert_eq!(fetcher.convert(dec!(10), "usd", " jpy").unwrap(), dec!(1454.5455));
        assert_eq!(fetcher.convert(dec!(10), "EUR", "EUR").unwrap().to_string(), "10.0000");
        assert_eq!(
            fetcher.convert(dec!(10), "EUR", "CHF").unwrap_err(),
            RateError::UnknownCurrency("CHF".to_string())
        );
    }
}
