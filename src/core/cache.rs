//! Persistence abstraction for the last known good rate table

use super::error::RateError;
use super::rates::RateTable;
use async_trait::async_trait;

/// Durable home of the most recent valid [`RateTable`].
///
/// Staleness is not a store concern: `load` returns whatever was saved last.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Fails with [`RateError::CacheNotFound`] when nothing was saved, and with
    /// [`RateError::CacheCorrupt`] when the saved record cannot be used.
    async fn load(&self) -> Result<RateTable, RateError>;

    /// Replaces any previously saved table. Readers see either the old or the
    /// new table, never a mix.
    async fn save(&self, table: &RateTable) -> Result<(), RateError>;
}
