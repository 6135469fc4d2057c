//! Core rate acquisition, caching and conversion

pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod log;
pub mod provider;
pub mod rates;

// Re-export main types for cleaner imports
pub use cache::RateStore;
pub use error::RateError;
pub use fetcher::{FetcherOptions, RateFetcher, RefreshHandle};
pub use history::{HistoryPeriod, RateHistory};
pub use provider::{ProviderSlot, RateProvider};
pub use rates::RateTable;
