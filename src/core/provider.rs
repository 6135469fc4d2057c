//! Exchange rate provider abstractions

use super::error::RateError;
use super::rates::RateTable;
use async_trait::async_trait;
use std::sync::Arc;

/// A remote source of exchange rates.
///
/// Implementations may answer relative to a different base than requested;
/// the fetcher re-bases and validates whatever comes back.
#[async_trait]
pub trait RateProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, base: &str) -> Result<RateTable, RateError>;
}

/// A provider together with its position in the fallback order.
#[derive(Clone)]
pub struct ProviderSlot {
    pub priority: u32,
    pub provider: Arc<dyn RateProvider>,
}

impl ProviderSlot {
    pub fn new(priority: u32, provider: Arc<dyn RateProvider>) -> Self {
        Self { priority, provider }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("priority", &self.priority)
            .field("name", &self.name())
            .finish()
    }
}
