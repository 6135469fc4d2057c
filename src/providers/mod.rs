pub mod ecb;
pub mod open_er;
pub mod util;
pub mod yahoo_finance;

use crate::core::config::{AppConfig, DEFAULT_YAHOO_URL};
use crate::core::provider::{ProviderSlot, RateProvider};
use anyhow::{Result, bail};
use std::sync::Arc;

/// Builds the configured providers in fallback order
pub fn build_providers(config: &AppConfig) -> Result<Vec<ProviderSlot>> {
    let mut slots = Vec::new();
    let providers = &config.providers;

    if let Some(ecb) = &providers.ecb {
        let provider: Arc<dyn RateProvider> =
            Arc::new(ecb::EcbProvider::new(&ecb.base_url, config.retries)?);
        slots.push(ProviderSlot::new(ecb.priority, provider));
    }
    if let Some(open_er) = &providers.open_er {
        let provider: Arc<dyn RateProvider> =
            Arc::new(open_er::OpenErProvider::new(&open_er.base_url, config.retries)?);
        slots.push(ProviderSlot::new(open_er.priority, provider));
    }
    if let Some(yahoo) = &providers.yahoo {
        let provider: Arc<dyn RateProvider> = Arc::new(yahoo_finance::YahooProvider::new(
            &yahoo.base_url,
            yahoo.currencies.clone(),
            config.retries,
        )?);
        slots.push(ProviderSlot::new(yahoo.priority, provider));
    }

    if slots.is_empty() {
        bail!("No rate providers configured");
    }
    slots.sort_by_key(|slot| slot.priority);
    Ok(slots)
}

/// Yahoo client for rate history, using the configured endpoint when there is one
pub fn build_history_provider(config: &AppConfig) -> Result<yahoo_finance::YahooProvider> {
    let base_url = config
        .providers
        .yahoo
        .as_ref()
        .map_or(DEFAULT_YAHOO_URL, |p| p.base_url.as_str());
    yahoo_finance::YahooProvider::new(base_url, Vec::new(), config.retries)
}
