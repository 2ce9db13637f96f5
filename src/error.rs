//! Error taxonomy surfaced by the analysis pipeline

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::provider::ProviderError;
use crate::Ticker;

/// Conditions that make an analysis impossible.
///
/// Cache corruption and stale data are recovered inside the pipeline and never
/// reach this type.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("unknown instrument: {0}")]
    UnknownInstrument(Ticker),

    #[error("no data available for {ticker}: {reason}")]
    DataUnavailable { ticker: Ticker, reason: String },

    #[error("no data found for ticker {0}")]
    EmptySeries(Ticker),

    #[error("cache write failed for {ticker}: {source}")]
    Cache {
        ticker: Ticker,
        #[source]
        source: CacheError,
    },
}

impl AnalysisError {
    pub(crate) fn from_provider(ticker: &Ticker, err: ProviderError) -> Self {
        match err {
            ProviderError::UnknownInstrument(_) => AnalysisError::UnknownInstrument(ticker.clone()),
            ProviderError::DataUnavailable(reason) => AnalysisError::DataUnavailable {
                ticker: ticker.clone(),
                reason,
            },
        }
    }
}

/// The provider could not be reached; the cached series was served as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaleDataWarning {
    pub ticker: Ticker,
    /// Last bar date in the cached series that was served
    pub last_cached: Option<NaiveDate>,
    pub reason: String,
}

impl std::fmt::Display for StaleDataWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last_cached {
            Some(date) => write!(
                f,
                "stale data for {}: serving cache through {} ({})",
                self.ticker, date, self.reason
            ),
            None => write!(f, "stale data for {}: {}", self.ticker, self.reason),
        }
    }
}
