//! On-disk price series cache
//!
//! One CSV file per (ticker, period) key, `<TICKER>_<period>.csv`, with header
//! `date,open,high,low,close,volume`. Deleting a file forces a full refetch on
//! the next request.
//!
//! Saves are atomic: the series is written to a temporary file in the cache
//! directory and renamed over the target, so readers never observe a partial
//! write. Writers for the same key are serialized in-process through
//! [`CacheStore::lock`].
//!
//! The file's modification time records when the series was written. The
//! updater compares it with the session close of the last bar to tell a
//! settled bar from one cached while its session was still trading.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{Bar, Period, PriceSeries, Ticker};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("corrupt cache file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cache CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// A file found in the cache directory
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub ticker: Ticker,
    pub period: Period,
    pub path: PathBuf,
    /// `None` when the file cannot be read back as a valid series
    pub bars: Option<usize>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

type KeyLocks = HashMap<(Ticker, Period), Arc<AsyncMutex<()>>>;

/// Persistent per-(ticker, period) price series store
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    locks: Arc<Mutex<KeyLocks>>,
}

impl CacheStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        CacheStore {
            dir: dir.as_ref().to_path_buf(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, ticker: &Ticker, period: Period) -> PathBuf {
        let name = ticker.as_str().replace(['/', '\\'], "-");
        self.dir.join(format!("{}_{}.csv", name, period))
    }

    /// Acquire the writer lock for one key.
    ///
    /// Hold the guard across load → fetch → merge → save so two concurrent
    /// updates of the same key cannot append divergent tails.
    pub async fn lock(&self, ticker: &Ticker, period: Period) -> OwnedMutexGuard<()> {
        let key_lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry((ticker.clone(), period))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        key_lock.lock_owned().await
    }

    /// Load the cached series for a key.
    ///
    /// `Ok(None)` when nothing is cached; [`CacheError::Corrupt`] when the file
    /// exists but does not hold a valid, strictly increasing series.
    pub fn load(&self, ticker: &Ticker, period: Period) -> Result<Option<PriceSeries>, CacheError> {
        let path = self.path_for(ticker, period);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No cache for {} {}", ticker, period);
                return Ok(None);
            }
            Err(e) => return Err(CacheError::Io(e)),
        };

        let corrupt = |reason: String| CacheError::Corrupt {
            path: path.clone(),
            reason,
        };

        let mut reader = csv::Reader::from_reader(file);
        let mut bars = Vec::new();
        for (row_idx, result) in reader.deserialize::<Bar>().enumerate() {
            // +2 for 1-indexed and header row
            let bar = result.map_err(|e| corrupt(format!("row {}: {}", row_idx + 2, e)))?;
            bars.push(bar);
        }

        let series = PriceSeries::new(bars).map_err(|e| corrupt(e.to_string()))?;
        debug!(
            "Loaded {} bars for {} {} from {}",
            series.len(),
            ticker,
            period,
            path.display()
        );
        Ok(Some(series))
    }

    /// Atomically replace the persisted series for a key
    pub fn save(&self, ticker: &Ticker, period: Period, series: &PriceSeries) -> Result<PathBuf, CacheError> {
        self.save_at(ticker, period, series, Utc::now())
    }

    /// [`save`](Self::save), stamping the file as written at `written_at`
    pub fn save_at(
        &self,
        ticker: &Ticker,
        period: Period,
        series: &PriceSeries,
        written_at: DateTime<Utc>,
    ) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(ticker, period);

        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file());
            for bar in series.bars() {
                writer.serialize(bar)?;
            }
            writer.flush()?;
        }
        tmp.as_file().set_modified(SystemTime::from(written_at))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;

        info!("Saved {} bars to {}", series.len(), path.display());
        Ok(path)
    }

    /// When the series for a key was last written, `None` when nothing is cached
    pub fn written_at(&self, ticker: &Ticker, period: Period) -> Result<Option<DateTime<Utc>>, CacheError> {
        match fs::metadata(self.path_for(ticker, period)) {
            Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Record that the cached series was confirmed current at `at` without
    /// rewriting its contents
    pub fn mark_written(&self, ticker: &Ticker, period: Period, at: DateTime<Utc>) -> Result<(), CacheError> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.path_for(ticker, period))?;
        file.set_modified(SystemTime::from(at))?;
        Ok(())
    }

    /// Delete one key. Returns whether a file was removed.
    pub fn remove(&self, ticker: &Ticker, period: Period) -> Result<bool, CacheError> {
        match fs::remove_file(self.path_for(ticker, period)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Every cache file, sorted by ticker then period
    pub fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry?.path();
            let Some((ticker, period)) = parse_file_name(&path) else {
                continue;
            };

            let loaded = match self.load(&ticker, period) {
                Ok(series) => series,
                Err(e) => {
                    warn!("Unreadable cache file {}: {}", path.display(), e);
                    None
                }
            };
            entries.push(CacheEntry {
                bars: loaded.as_ref().map(PriceSeries::len),
                first_date: loaded.as_ref().and_then(|s| s.first().map(|b| b.date)),
                last_date: loaded.as_ref().and_then(PriceSeries::last_date),
                ticker,
                period,
                path,
            });
        }

        entries.sort_by(|a, b| (&a.ticker, a.period).cmp(&(&b.ticker, b.period)));
        Ok(entries)
    }

    /// Remove every file for `ticker` (all periods), or the whole cache when `None`.
    /// Returns the number of files removed.
    pub fn clear(&self, ticker: Option<&Ticker>) -> Result<usize, CacheError> {
        let mut removed = 0;
        for entry in self.list()? {
            if ticker.is_some_and(|t| *t != entry.ticker) {
                continue;
            }
            if self.remove(&entry.ticker, entry.period)? {
                removed += 1;
            }
        }
        info!("Removed {} cache file(s) from {}", removed, self.dir.display());
        Ok(removed)
    }
}

/// `<TICKER>_<period>.csv` → key
fn parse_file_name(path: &Path) -> Option<(Ticker, Period)> {
    if path.extension()? != "csv" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (ticker, period) = stem.rsplit_once('_')?;
    if ticker.is_empty() {
        return None;
    }
    Some((Ticker::new(ticker), period.parse().ok()?))
}
