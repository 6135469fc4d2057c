pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::core::config::AppConfig;
use crate::core::history::HistoryPeriod;
use crate::core::{FetcherOptions, RateFetcher};
use crate::store::FileRateStore;
use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Convert {
        amount: Decimal,
        from: String,
        to: String,
        json: bool,
    },
    Rates {
        codes: Vec<String>,
    },
    Refresh,
    History {
        from: String,
        to: String,
        period: HistoryPeriod,
        json: bool,
    },
}

/// Wires the configured providers and the on-disk cache into a fetcher.
pub fn build_fetcher(config: &AppConfig) -> Result<RateFetcher> {
    let providers = providers::build_providers(config)?;
    let cache_path = config.cache_file_path()?;
    debug!("Using rates cache at {}", cache_path.display());

    let options = FetcherOptions {
        base: config.base_currency.clone(),
        timeout: config.timeout(),
        decimal_places: config.decimal_places,
    };
    Ok(RateFetcher::new(
        options,
        providers,
        Arc::new(FileRateStore::new(cache_path)),
    ))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fxc starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load_or_default()?,
    };
    debug!("Loaded config: {config:#?}");

    let max_age = config.max_age();

    match command {
        AppCommand::Convert {
            amount,
            from,
            to,
            json,
        } => {
            let fetcher = build_fetcher(&config)?;
            cli::convert::run(&fetcher, max_age, amount, &from, &to, json).await
        }
        AppCommand::Rates { codes } => {
            cli::rates::run(&build_fetcher(&config)?, max_age, &codes).await
        }
        AppCommand::Refresh => cli::refresh::run(&build_fetcher(&config)?).await,
        AppCommand::History {
            from,
            to,
            period,
            json,
        } => {
            let provider = providers::build_history_provider(&config)?;
            cli::history::run(
                &provider,
                config.timeout(),
                &from,
                &to,
                period,
                config.decimal_places,
                json,
            )
            .await
        }
    }
}
