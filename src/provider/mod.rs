//! Upstream market-data providers
//!
//! The updater only talks to the [`MarketDataProvider`] trait, so tests drive it
//! with an in-memory provider and the binary plugs in [`YahooProvider`].

pub mod yahoo;

pub use yahoo::YahooProvider;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;

use crate::{Bar, Period, Ticker};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider does not recognise the symbol. Never retried.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    /// Network failure, throttling or an unusable payload
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::DataUnavailable(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::DataUnavailable(e.to_string())
    }
}

/// Source of daily bars
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Daily bars with `start <= date <= end`, ascending
    async fn fetch(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError>;

    /// Full history for `period` ending at `end`. Providers that understand
    /// named ranges (`ytd`, `max`) natively should override this.
    async fn fetch_period(
        &self,
        ticker: &Ticker,
        period: Period,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        let start = period.start_date(end).unwrap_or(NaiveDate::MIN);
        self.fetch(ticker, start, end).await
    }
}

#[async_trait]
impl<P: MarketDataProvider + ?Sized> MarketDataProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        (**self).fetch(ticker, start, end).await
    }

    async fn fetch_period(
        &self,
        ticker: &Ticker,
        period: Period,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        (**self).fetch_period(ticker, period, end).await
    }
}
