//! Incremental cache refresh
//!
//! Brings the cached series for one (ticker, period) key up to date with the
//! smallest possible provider request:
//!
//! 1. No usable cache: fetch the whole period.
//! 2. Cache present: fetch only the sessions after the last cached date, merge
//!    them in and save. When the cache was written before the last bar's
//!    session closed, that bar is provisional and its date is requested again
//!    so the settled bar replaces it.
//! 3. Provider unreachable: serve the cache with a [`StaleDataWarning`], or fail
//!    with `DataUnavailable` when there is nothing cached.

use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStore};
use crate::calendar::MarketCalendar;
use crate::error::{AnalysisError, StaleDataWarning};
use crate::provider::{MarketDataProvider, ProviderError};
use crate::series::MergeStats;
use crate::{Period, PriceSeries, Ticker};

/// What an update produced
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub series: PriceSeries,
    /// Set when the provider could not be reached and the cache was served as-is
    pub stale: Option<StaleDataWarning>,
    pub stats: MergeStats,
    /// Whether the whole period was (re)fetched
    pub full_fetch: bool,
}

pub struct IncrementalUpdater<'a, P: ?Sized> {
    provider: &'a P,
    cache: &'a CacheStore,
}

impl<'a, P: MarketDataProvider + ?Sized> IncrementalUpdater<'a, P> {
    pub fn new(provider: &'a P, cache: &'a CacheStore) -> Self {
        IncrementalUpdater { provider, cache }
    }

    /// Refresh the cache entry for `ticker`/`period` as of `now`.
    ///
    /// Holds the per-key cache lock for the whole load → fetch → merge → save
    /// sequence.
    pub async fn update(
        &self,
        ticker: &Ticker,
        period: Period,
        calendar: &MarketCalendar,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, AnalysisError> {
        let _guard = self.cache.lock(ticker, period).await;
        let today = calendar.local_date(now);

        let cached = match self.cache.load(ticker, period) {
            Ok(series) => series.filter(|s| !s.is_empty()),
            Err(e @ CacheError::Corrupt { .. }) => {
                warn!("Discarding cache for {} {}: {}", ticker, period, e);
                None
            }
            Err(e) => {
                warn!("Cache unreadable for {} {}, refetching: {}", ticker, period, e);
                None
            }
        };

        let Some(series) = cached else {
            return self.full_fetch(ticker, period, today, now).await;
        };
        let written_at = self.cache.written_at(ticker, period).unwrap_or_else(|e| {
            warn!("Cannot read write time of {} {} cache: {}", ticker, period, e);
            None
        });
        self.incremental_fetch(ticker, period, series, calendar, written_at, now)
            .await
    }

    async fn full_fetch(
        &self,
        ticker: &Ticker,
        period: Period,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, AnalysisError> {
        info!("Fetching full {} history for {}", period, ticker);
        let fetched = self
            .provider
            .fetch_period(ticker, period, today)
            .await
            .map_err(|e| AnalysisError::from_provider(ticker, e))?;

        let mut series = PriceSeries::default();
        let stats = series.merge(fetched);
        if series.is_empty() {
            return Err(AnalysisError::EmptySeries(ticker.clone()));
        }

        self.save(ticker, period, &series, now)?;
        Ok(UpdateOutcome {
            series,
            stale: None,
            stats,
            full_fetch: true,
        })
    }

    async fn incremental_fetch(
        &self,
        ticker: &Ticker,
        period: Period,
        mut series: PriceSeries,
        calendar: &MarketCalendar,
        written_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, AnalysisError> {
        let today = calendar.local_date(now);
        let Some(last) = series.last_date() else {
            return self.full_fetch(ticker, period, today, now).await;
        };
        let provisional = is_provisional(calendar, last, written_at);
        let start = if provisional {
            debug!("Last cached bar {} of {} may be provisional", last, ticker);
            last
        } else {
            match last.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => return Ok(fresh(series)),
            }
        };
        if start > today {
            debug!("Cache for {} {} is current through {}", ticker, period, last);
            return Ok(fresh(series));
        }

        debug!("Fetching {} from {} to {}", ticker, start, today);
        match self.provider.fetch(ticker, start, today).await {
            Ok(fetched) => {
                let stats = series.merge(fetched);
                if stats.appended + stats.replaced > 0 {
                    info!(
                        "Merged {} new and {} replaced bars into {} {}",
                        stats.appended, stats.replaced, ticker, period
                    );
                    self.save(ticker, period, &series, now)?;
                } else if provisional {
                    // Unchanged, but confirmed as of `now`
                    if let Err(e) = self.cache.mark_written(ticker, period, now) {
                        warn!("Cannot stamp {} {} cache: {}", ticker, period, e);
                    }
                }
                Ok(UpdateOutcome {
                    series,
                    stale: None,
                    stats,
                    full_fetch: false,
                })
            }
            Err(e @ ProviderError::UnknownInstrument(_)) => Err(AnalysisError::from_provider(ticker, e)),
            Err(ProviderError::DataUnavailable(reason)) => {
                let warning = StaleDataWarning {
                    ticker: ticker.clone(),
                    last_cached: Some(last),
                    reason,
                };
                warn!("{}", warning);
                Ok(UpdateOutcome {
                    series,
                    stale: Some(warning),
                    stats: MergeStats::default(),
                    full_fetch: false,
                })
            }
        }
    }

    fn save(
        &self,
        ticker: &Ticker,
        period: Period,
        series: &PriceSeries,
        now: DateTime<Utc>,
    ) -> Result<(), AnalysisError> {
        self.cache
            .save_at(ticker, period, series, now)
            .map(|_| ())
            .map_err(|source| AnalysisError::Cache {
                ticker: ticker.clone(),
                source,
            })
    }
}

/// A bar is provisional when its series was written before the bar's session
/// closed. Bars dated on non-trading days are treated as settled.
fn is_provisional(calendar: &MarketCalendar, date: NaiveDate, written_at: Option<DateTime<Utc>>) -> bool {
    match (calendar.session(date), written_at) {
        (Some((_, close)), Some(at)) => at < close,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn fresh(series: PriceSeries) -> UpdateOutcome {
    UpdateOutcome {
        series,
        stale: None,
        stats: MergeStats::default(),
        full_fetch: false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calendar::CalendarKind;
    use crate::Bar;
    use async_trait::async_trait;
    use chrono::{Datelike, Duration, TimeZone};
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory provider answering from a fixed history; failures can be scripted.
    #[derive(Default)]
    pub(crate) struct ScriptedProvider {
        pub history: Mutex<Vec<Bar>>,
        pub failures: Mutex<VecDeque<ProviderError>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub fn with_history(history: Vec<Bar>) -> Self {
            ScriptedProvider {
                history: Mutex::new(history),
                ..Default::default()
            }
        }

        pub fn fail_next(&self, err: ProviderError) {
            self.failures.lock().unwrap().push_back(err);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(
            &self,
            ticker: &Ticker,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<Bar>, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("fetch {} {} {}", ticker, start, end));
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(self
                .history
                .lock()
                .unwrap()
                .iter()
                .filter(|b| b.date >= start && b.date <= end)
                .cloned()
                .collect())
        }
    }

    pub(crate) fn weekday_bars(start: NaiveDate, n: usize, first_close: f64, step: f64) -> Vec<Bar> {
        let mut bars = Vec::with_capacity(n);
        let mut date = start;
        while bars.len() < n {
            if date.weekday().number_from_monday() <= 5 {
                let c = first_close + step * bars.len() as f64;
                bars.push(Bar::new_unchecked(date, c, c + 1.0, c - 1.0, c, 1_000_000));
            }
            date += Duration::days(1);
        }
        bars
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn after_close(d: NaiveDate) -> DateTime<Utc> {
        // 17:00 New York (EDT)
        Utc.from_utc_datetime(&d.and_hms_opt(21, 0, 0).unwrap())
    }

    fn setup() -> (TempDir, CacheStore, MarketCalendar) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        (dir, store, MarketCalendar::new(CalendarKind::EquityUs))
    }

    #[tokio::test]
    async fn test_cold_cache_fetches_full_period() {
        let (_dir, store, nyse) = setup();
        let provider = ScriptedProvider::with_history(weekday_bars(date(2024, 1, 1), 100, 50.0, 0.5));
        let ticker = Ticker::new("AAPL");
        let now = after_close(date(2024, 5, 17));

        let outcome = IncrementalUpdater::new(&provider, &store)
            .update(&ticker, Period::OneYear, &nyse, now)
            .await
            .unwrap();

        assert!(outcome.full_fetch);
        assert_eq!(outcome.series.len(), 100);
        assert!(store.load(&ticker, Period::OneYear).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_incremental_fetch_requests_only_new_days() {
        let (_dir, store, nyse) = setup();
        let history = weekday_bars(date(2024, 1, 1), 100, 50.0, 0.5);
        let ticker = Ticker::new("AAPL");

        let cached = PriceSeries::new(history[..90].to_vec()).unwrap();
        let last = cached.last_date().unwrap();
        store.save(&ticker, Period::OneYear, &cached).unwrap();

        let provider = ScriptedProvider::with_history(history.clone());
        let today = history[99].date;
        let outcome = IncrementalUpdater::new(&provider, &store)
            .update(&ticker, Period::OneYear, &nyse, after_close(today))
            .await
            .unwrap();

        assert!(!outcome.full_fetch);
        assert_eq!(outcome.stats.appended, 10);
        assert_eq!(outcome.series.len(), 100);
        assert_eq!(
            provider.calls(),
            vec![format!("fetch AAPL {} {}", last + Duration::days(1), today)]
        );
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let (_dir, store, nyse) = setup();
        let provider = ScriptedProvider::with_history(weekday_bars(date(2024, 1, 1), 60, 20.0, 0.1));
        let ticker = Ticker::new("MSFT");
        let now = after_close(date(2024, 3, 22));
        let updater = IncrementalUpdater::new(&provider, &store);

        updater.update(&ticker, Period::SixMonths, &nyse, now).await.unwrap();
        let path = store.path_for(&ticker, Period::SixMonths);
        let first = fs::read(&path).unwrap();

        let outcome = updater.update(&ticker, Period::SixMonths, &nyse, now).await.unwrap();
        assert_eq!(outcome.stats, MergeStats::default());
        assert_eq!(first, fs::read(&path).unwrap());
    }

    fn mid_session(d: NaiveDate) -> DateTime<Utc> {
        // 13:00 New York (EDT)
        Utc.from_utc_datetime(&d.and_hms_opt(17, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_provisional_bar_is_replaced_after_close() {
        let (_dir, store, nyse) = setup();
        let ticker = Ticker::new("SPY");
        let session = date(2024, 5, 10);
        let mut history = weekday_bars(date(2024, 4, 1), 30, 400.0, 1.0);
        assert_eq!(history[29].date, session);
        let settled = history[29].clone();
        history[29].close = 428.0;

        let provider = ScriptedProvider::with_history(history);
        let updater = IncrementalUpdater::new(&provider, &store);
        updater
            .update(&ticker, Period::OneMonth, &nyse, mid_session(session))
            .await
            .unwrap();

        // The session settles with a different close
        provider.history.lock().unwrap()[29] = settled.clone();
        let outcome = updater
            .update(&ticker, Period::OneMonth, &nyse, after_close(session))
            .await
            .unwrap();
        assert_eq!(outcome.stats.replaced, 1);
        assert_eq!(outcome.series.last().unwrap().close, settled.close);
        assert_eq!(provider.calls()[1], "fetch SPY 2024-05-10 2024-05-10");
        let cached = store.load(&ticker, Period::OneMonth).unwrap().unwrap();
        assert_eq!(cached.last().unwrap(), &settled);

        // Settled now: a later refresh the same evening leaves the provider alone
        updater
            .update(&ticker, Period::OneMonth, &nyse, after_close(session) + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(provider.calls().len(), 2);

        // Next session: only new days are requested
        let monday = date(2024, 5, 13);
        provider
            .history
            .lock()
            .unwrap()
            .push(Bar::new_unchecked(monday, 430.0, 431.0, 429.0, 430.0, 1_000_000));
        let outcome = updater
            .update(&ticker, Period::OneMonth, &nyse, after_close(monday))
            .await
            .unwrap();
        assert_eq!(outcome.stats.appended, 1);
        let idx = outcome.series.position(session).unwrap();
        assert_eq!(outcome.series.bars()[idx], settled);
        assert_eq!(provider.calls()[2], "fetch SPY 2024-05-11 2024-05-13");
    }

    #[tokio::test]
    async fn test_unchanged_provisional_bar_is_confirmed() {
        let (_dir, store, nyse) = setup();
        let ticker = Ticker::new("SPY");
        let session = date(2024, 5, 10);
        let provider = ScriptedProvider::with_history(weekday_bars(date(2024, 4, 1), 30, 400.0, 1.0));
        let updater = IncrementalUpdater::new(&provider, &store);

        updater
            .update(&ticker, Period::OneMonth, &nyse, mid_session(session))
            .await
            .unwrap();
        let path = store.path_for(&ticker, Period::OneMonth);
        let written = fs::read(&path).unwrap();

        let outcome = updater
            .update(&ticker, Period::OneMonth, &nyse, after_close(session))
            .await
            .unwrap();
        assert_eq!(outcome.stats, MergeStats::default());
        assert_eq!(written, fs::read(&path).unwrap());
        assert_eq!(
            store.written_at(&ticker, Period::OneMonth).unwrap(),
            Some(after_close(session))
        );

        updater
            .update(&ticker, Period::OneMonth, &nyse, after_close(session))
            .await
            .unwrap();
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_cache_triggers_full_refetch() {
        let (_dir, store, nyse) = setup();
        let ticker = Ticker::new("IBM");
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(
            store.path_for(&ticker, Period::OneYear),
            "date,open,high,low,close,volume\n2024-01-02,abc,1,1,1,1\n",
        )
        .unwrap();
        assert!(matches!(
            store.load(&ticker, Period::OneYear),
            Err(CacheError::Corrupt { .. })
        ));

        let provider = ScriptedProvider::with_history(weekday_bars(date(2024, 1, 1), 40, 150.0, 0.2));
        let outcome = IncrementalUpdater::new(&provider, &store)
            .update(&ticker, Period::OneYear, &nyse, after_close(date(2024, 3, 1)))
            .await
            .unwrap();

        assert!(outcome.full_fetch);
        assert_eq!(outcome.series.len(), 40);
        assert_eq!(store.load(&ticker, Period::OneYear).unwrap().unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_unreachable_provider_serves_stale_cache() {
        let (_dir, store, nyse) = setup();
        let ticker = Ticker::new("AAPL");
        let history = weekday_bars(date(2024, 1, 1), 50, 100.0, 0.3);
        let cached = PriceSeries::new(history[..45].to_vec()).unwrap();
        store.save(&ticker, Period::OneYear, &cached).unwrap();

        let provider = ScriptedProvider::with_history(history.clone());
        provider.fail_next(ProviderError::DataUnavailable("connection refused".into()));

        let outcome = IncrementalUpdater::new(&provider, &store)
            .update(&ticker, Period::OneYear, &nyse, after_close(history[49].date))
            .await
            .unwrap();

        assert_eq!(outcome.series, cached);
        let warning = outcome.stale.unwrap();
        assert_eq!(warning.last_cached, cached.last_date());
        assert!(warning.reason.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_unreachable_provider_without_cache_fails() {
        let (_dir, store, nyse) = setup();
        let provider = ScriptedProvider::default();
        provider.fail_next(ProviderError::DataUnavailable("timeout".into()));

        let err = IncrementalUpdater::new(&provider, &store)
            .update(&Ticker::new("AAPL"), Period::OneYear, &nyse, after_close(date(2024, 3, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unknown_instrument_is_fatal() {
        let (_dir, store, nyse) = setup();
        let provider = ScriptedProvider::default();
        provider.fail_next(ProviderError::UnknownInstrument("ZZZZ".into()));

        let err = IncrementalUpdater::new(&provider, &store)
            .update(&Ticker::new("ZZZZ"), Period::OneYear, &nyse, after_close(date(2024, 3, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownInstrument(_)));
    }

    #[tokio::test]
    async fn test_empty_history_is_empty_series() {
        let (_dir, store, nyse) = setup();
        let provider = ScriptedProvider::default();
        let err = IncrementalUpdater::new(&provider, &store)
            .update(&Ticker::new("NEW"), Period::OneYear, &nyse, after_close(date(2024, 3, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::EmptySeries(_)));
    }

    #[tokio::test]
    async fn test_current_cache_skips_provider() {
        let (_dir, store, nyse) = setup();
        let ticker = Ticker::new("AAPL");
        let history = weekday_bars(date(2024, 1, 1), 20, 100.0, 1.0);
        store
            .save(&ticker, Period::OneYear, &PriceSeries::new(history.clone()).unwrap())
            .unwrap();

        let provider = ScriptedProvider::with_history(history.clone());
        IncrementalUpdater::new(&provider, &store)
            .update(&ticker, Period::OneYear, &nyse, after_close(history[19].date))
            .await
            .unwrap();
        assert!(provider.calls().is_empty());
    }
}
