use crate::core::cache::RateStore;
use crate::core::error::RateError;
use crate::core::rates::RateTable;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory rate store, for tests and for embedding without a filesystem.
#[derive(Clone, Default)]
pub struct MemoryRateStore {
    inner: Arc<Mutex<Option<RateTable>>>,
    saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryRateStore {
    /// Creates an empty MemoryRateStore
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `table`
    pub fn with_table(table: RateTable) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(table))),
            ..Self::default()
        }
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every following save fail, as a full disk would
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn load(&self) -> Result<RateTable, RateError> {
        let stored = self.inner.lock().await;
        match stored.as_ref() {
            Some(table) => {
                debug!("Cache HIT: {} rates from {}", table.rates.len(), table.source);
                Ok(table.clone())
            }
            None => {
                debug!("Cache MISS");
                Err(RateError::CacheNotFound)
            }
        }
    }

    async fn save(&self, table: &RateTable) -> Result<(), RateError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RateError::CacheWrite("memory store is read-only".to_string()));
        }
        let mut stored = self.inner.lock().await;
        *stored = Some(table.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        debug!("Cache PUT");
        Ok(())
    }
}
