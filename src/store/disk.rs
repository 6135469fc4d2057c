use crate::core::cache::RateStore;
use crate::core::error::RateError;
use crate::core::rates::RateTable;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk form of a [`RateTable`].
///
/// Rates are written as decimal strings; numbers are accepted on read, as is
/// a unix `timestamp` in place of `fetched_at`.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    base: String,
    rates: BTreeMap<String, Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fetched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    timestamp: Option<i64>,
    #[serde(default)]
    source: Option<String>,
}

impl From<&RateTable> for CacheRecord {
    fn from(table: &RateTable) -> Self {
        CacheRecord {
            base: table.base.clone(),
            rates: table.rates.clone(),
            fetched_at: Some(table.fetched_at),
            timestamp: None,
            source: Some(table.source.clone()),
        }
    }
}

impl TryFrom<CacheRecord> for RateTable {
    type Error = RateError;

    fn try_from(record: CacheRecord) -> Result<Self, Self::Error> {
        let fetched_at = match (record.fetched_at, record.timestamp) {
            (Some(at), _) => at,
            (None, Some(secs)) => Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| RateError::CacheCorrupt(format!("invalid timestamp {secs}")))?,
            (None, None) => {
                return Err(RateError::CacheCorrupt(
                    "record has no acquisition time".to_string(),
                ));
            }
        };

        let table = RateTable {
            base: record.base,
            rates: record.rates,
            fetched_at,
            source: record.source.unwrap_or_else(|| "cache".to_string()),
        };
        table
            .validate()
            .map_err(|e| RateError::CacheCorrupt(e.to_string()))?;
        Ok(table)
    }
}

/// Stores the rate table as a JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileRateStore {
    path: PathBuf,
}

impl FileRateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Writes `payload` to a uniquely named temp file beside `path`, syncs it and
/// renames it over `path`. The temp file is removed if any step fails.
fn write_atomically(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::Builder::new()
        .prefix(".rates_cache.")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    file.write_all(payload)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl RateStore for FileRateStore {
    async fn load(&self) -> Result<RateTable, RateError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cache MISS: {} does not exist", self.path.display());
                return Err(RateError::CacheNotFound);
            }
            Err(e) => {
                return Err(RateError::CacheCorrupt(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let record: CacheRecord = serde_json::from_slice(&bytes).map_err(|e| {
            RateError::CacheCorrupt(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        let table = RateTable::try_from(record)?;
        debug!(
            "Cache HIT: {} rates from {} fetched at {}",
            table.rates.len(),
            table.source,
            table.fetched_at
        );
        Ok(table)
    }

    async fn save(&self, table: &RateTable) -> Result<(), RateError> {
        let payload = serde_json::to_vec_pretty(&CacheRecord::from(table))
            .map_err(|e| RateError::CacheWrite(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RateError::CacheWrite(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &payload))
            .await
            .map_err(|e| RateError::CacheWrite(e.to_string()))?
            .map_err(|e| {
                RateError::CacheWrite(format!("failed to write {}: {e}", self.path.display()))
            })?;

        debug!("Cache PUT: {}", self.path.display());
        Ok(())
    }
}
