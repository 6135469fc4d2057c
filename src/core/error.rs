//! Error taxonomy for rate acquisition, caching and conversion

use thiserror::Error;

/// Errors produced by the rate core.
///
/// Provider errors are recovered by the fetcher moving on to the next provider,
/// cache errors are recovered by surfacing [`RateError::Unavailable`] only when
/// no provider succeeded either. `Clone` lets a shared in-flight refresh hand
/// the same outcome to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateError {
    #[error("Provider {provider} timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u128 },

    #[error("Provider {provider} returned an invalid response: {reason}")]
    ProviderInvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} request failed: {reason}")]
    ProviderRequest { provider: String, reason: String },

    #[error("No cached rates found")]
    CacheNotFound,

    #[error("Cached rates are corrupt: {0}")]
    CacheCorrupt(String),

    #[error("Failed to write rate cache: {0}")]
    CacheWrite(String),

    #[error("Invalid rate table: {0}")]
    InvalidTable(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Conversion of {amount} {from} to {to} overflowed")]
    ConversionOverflow {
        amount: String,
        from: String,
        to: String,
    },

    #[error("Exchange rates are unavailable: no provider succeeded and no cached rates exist")]
    Unavailable,
}

impl RateError {
    pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> Self {
        RateError::ProviderInvalidResponse {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn request(provider: &str, reason: impl ToString) -> Self {
        RateError::ProviderRequest {
            provider: provider.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for the cache errors a caller should read as "nothing cached".
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, RateError::CacheNotFound | RateError::CacheCorrupt(_))
    }
}
