use super::convert::DEFAULT_DECIMAL_PLACES;
use super::rates::{is_currency_code, normalize_code};
use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

const CACHE_FILE_NAME: &str = "rates_cache.json";
pub const DEFAULT_YAHOO_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub priority: u32,
    /// Quote currencies requested as `{base}{code}=X` pairs
    #[serde(default = "default_yahoo_currencies")]
    pub currencies: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub ecb: Option<ProviderConfig>,
    pub open_er: Option<ProviderConfig>,
    pub yahoo: Option<YahooProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            ecb: Some(ProviderConfig {
                base_url: "https://api.exchangerate.host".to_string(),
                priority: 1,
            }),
            open_er: Some(ProviderConfig {
                base_url: "https://open.er-api.com".to_string(),
                priority: 2,
            }),
            yahoo: Some(YahooProviderConfig {
                base_url: DEFAULT_YAHOO_URL.to_string(),
                priority: 3,
                currencies: default_yahoo_currencies(),
            }),
        }
    }
}

fn default_yahoo_currencies() -> Vec<String> {
    [
        "USD", "EUR", "GBP", "JPY", "AUD", "CAD", "CHF", "CNY", "SEK", "NOK", "DKK", "PLN", "CZK",
        "HUF", "KRW", "INR", "SGD", "HKD", "NZD", "MXN", "BRL", "ZAR", "TRY",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_base_currency() -> String {
    "EUR".to_string()
}

fn default_max_age_secs() -> u64 {
    60 * 60
}

fn default_decimal_places() -> u32 {
    DEFAULT_DECIMAL_PLACES
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retries() -> usize {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
    /// Staleness window for the in-memory and cached rates
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,
    /// Upper bound for a single provider attempt, retries included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts for failed HTTP requests
    #[serde(default = "default_retries")]
    pub retries: usize,
    pub cache_path: Option<String>,
    pub data_path: Option<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            base_currency: default_base_currency(),
            max_age_secs: default_max_age_secs(),
            decimal_places: default_decimal_places(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            cache_path: None,
            data_path: None,
            providers: ProvidersConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the default config file, or the built-in defaults when there is none.
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using built-in defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("in", "codito", "fxc")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("in", "codito", "fxc")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn cache_file_path(&self) -> Result<PathBuf> {
        match &self.cache_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(self.default_data_path()?.join(CACHE_FILE_NAME)),
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .normalize()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    fn normalize(&mut self) -> Result<()> {
        self.base_currency = normalize_code(&self.base_currency);
        if !is_currency_code(&self.base_currency) {
            bail!(
                "base_currency '{}' is not a 3-letter currency code",
                self.base_currency
            );
        }
        // rust_decimal keeps at most 28 fractional digits
        if self.decimal_places > 28 {
            bail!("decimal_places must be at most 28, got {}", self.decimal_places);
        }
        if self.max_age_secs == 0 {
            bail!("max_age_secs must be greater than zero");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if let Some(yahoo) = self.providers.yahoo.as_mut() {
            yahoo.currencies = yahoo.currencies.iter().map(|c| normalize_code(c)).collect();
            if let Some(bad) = yahoo.currencies.iter().find(|c| !is_currency_code(c)) {
                bail!("yahoo currency '{bad}' is not a 3-letter currency code");
            }
        }
        Ok(())
    }
}
