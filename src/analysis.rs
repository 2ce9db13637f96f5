//! Analysis orchestration
//!
//! Refreshes the cached series through the [`IncrementalUpdater`], then derives
//! indicators, levels, trend and day label into one [`AnalysisResult`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::cache::CacheStore;
use crate::calendar::MarketCalendar;
use crate::config::Config;
use crate::day_label::{self, DayLabel};
use crate::error::AnalysisError;
use crate::indicators::IndicatorFrame;
use crate::levels::{Level, LevelDetector};
use crate::provider::MarketDataProvider;
use crate::trend::{PricePosition, Trend, TrendClassifier};
use crate::updater::IncrementalUpdater;
use crate::{Period, PriceSeries, Ticker};

/// EMA values keyed by period, serialized as `ema_<period>` fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmaValues(pub BTreeMap<usize, Option<f64>>);

impl Serialize for EmaValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (period, value) in &self.0 {
            map.serialize_entry(&format!("ema_{}", period), value)?;
        }
        map.end()
    }
}

/// Analysis of one instrument as of its latest bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub ticker: Ticker,
    pub period: Period,
    /// Date of the latest bar
    pub as_of: NaiveDate,
    pub bars: usize,
    pub current_price: f64,
    pub price_change_1d: f64,
    pub price_change_pct_1d: f64,
    pub day_label: DayLabel,
    pub volume: u64,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    #[serde(flatten)]
    pub ema: EmaValues,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub price_vs_sma_50: PricePosition,
    pub price_vs_sma_200: PricePosition,
    pub trend: Trend,
    pub support_levels: Vec<Level>,
    pub resistance_levels: Vec<Level>,
    /// Indicators whose lookback exceeds the available history
    pub insufficient_history: Vec<String>,
    pub warnings: Vec<String>,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn round_opt(value: Option<f64>, decimals: i32) -> Option<f64> {
    value.map(|v| round_to(v, decimals))
}

impl AnalysisResult {
    /// Copy with prices at 2 decimals and MACD values at 4, for output
    pub fn rounded(&self) -> Self {
        AnalysisResult {
            current_price: round_to(self.current_price, 2),
            price_change_1d: round_to(self.price_change_1d, 2),
            price_change_pct_1d: round_to(self.price_change_pct_1d, 2),
            sma_20: round_opt(self.sma_20, 2),
            sma_50: round_opt(self.sma_50, 2),
            sma_200: round_opt(self.sma_200, 2),
            ema: EmaValues(
                self.ema
                    .0
                    .iter()
                    .map(|(&p, &v)| (p, round_opt(v, 2)))
                    .collect(),
            ),
            rsi_14: round_opt(self.rsi_14, 2),
            macd: round_opt(self.macd, 4),
            macd_signal: round_opt(self.macd_signal, 4),
            macd_histogram: round_opt(self.macd_histogram, 4),
            bb_upper: round_opt(self.bb_upper, 2),
            bb_middle: round_opt(self.bb_middle, 2),
            bb_lower: round_opt(self.bb_lower, 2),
            support_levels: self.support_levels.iter().map(Level::rounded).collect(),
            resistance_levels: self.resistance_levels.iter().map(Level::rounded).collect(),
            ..self.clone()
        }
    }
}

/// Derive the full analysis of `series` as of `now`.
///
/// Pure: no I/O, same inputs give the same result.
pub fn analyze_series(
    ticker: &Ticker,
    period: Period,
    series: &PriceSeries,
    calendar: &MarketCalendar,
    now: DateTime<Utc>,
    config: &Config,
) -> Result<AnalysisResult, AnalysisError> {
    let Some(last) = series.last() else {
        return Err(AnalysisError::EmptySeries(ticker.clone()));
    };
    let current_price = last.close;
    let prev_close = series
        .bars()
        .len()
        .checked_sub(2)
        .map(|i| series.bars()[i].close)
        .unwrap_or(current_price);
    let price_change = current_price - prev_close;

    let frame = IndicatorFrame::compute(series, &config.indicators);
    let Some(snapshot) = frame.latest() else {
        return Err(AnalysisError::EmptySeries(ticker.clone()));
    };
    let trend = TrendClassifier::new(config.trend.clone()).classify_frame(&frame, current_price);
    let levels = LevelDetector::new(config.levels.clone()).detect(series);

    Ok(AnalysisResult {
        ticker: ticker.clone(),
        period,
        as_of: last.date,
        bars: series.len(),
        current_price,
        price_change_1d: price_change,
        price_change_pct_1d: price_change / prev_close * 100.0,
        day_label: day_label::label(last.date, now, calendar),
        volume: last.volume,
        sma_20: snapshot.sma(20),
        sma_50: snapshot.sma(50),
        sma_200: snapshot.sma(200),
        ema: EmaValues(snapshot.ema.clone()),
        rsi_14: snapshot.rsi,
        macd: snapshot.macd,
        macd_signal: snapshot.macd_signal,
        macd_histogram: snapshot.macd_histogram,
        bb_upper: snapshot.bb_upper,
        bb_middle: snapshot.bb_middle,
        bb_lower: snapshot.bb_lower,
        price_vs_sma_50: PricePosition::of(current_price, snapshot.sma(50)),
        price_vs_sma_200: PricePosition::of(current_price, snapshot.sma(200)),
        trend,
        support_levels: levels.support,
        resistance_levels: levels.resistance,
        insufficient_history: frame.insufficient_history(),
        warnings: vec![],
    })
}

/// Entry point owning the provider and the cache
pub struct AnalysisOrchestrator<P> {
    provider: P,
    cache: CacheStore,
    config: Config,
}

impl<P: MarketDataProvider> AnalysisOrchestrator<P> {
    pub fn new(provider: P, config: Config) -> Self {
        let cache = CacheStore::new(&config.cache.dir);
        Self::with_cache(provider, cache, config)
    }

    pub fn with_cache(provider: P, cache: CacheStore, config: Config) -> Self {
        AnalysisOrchestrator {
            provider,
            cache,
            config,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Calendar for an instrument: the configured override, else inferred from the symbol
    pub fn calendar_for(&self, ticker: &Ticker) -> MarketCalendar {
        match self.config.calendar {
            Some(kind) => MarketCalendar::new(kind),
            None => MarketCalendar::for_ticker(ticker),
        }
    }

    pub async fn analyze(
        &self,
        ticker: &Ticker,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let calendar = self.calendar_for(ticker);
        let outcome = IncrementalUpdater::new(&self.provider, &self.cache)
            .update(ticker, period, &calendar, now)
            .await?;

        let mut result = analyze_series(ticker, period, &outcome.series, &calendar, now, &self.config)?;
        result.warnings.extend(outcome.stale.map(|w| w.to_string()));

        info!(
            "Analyzed {} {}: {} bars through {}, trend {}",
            ticker, period, result.bars, result.as_of, result.trend
        );
        Ok(result)
    }
}

impl<P: MarketDataProvider + 'static> AnalysisOrchestrator<P> {
    /// Analyze several instruments concurrently. Results keep the input order.
    pub async fn analyze_many(
        self: Arc<Self>,
        tickers: Vec<Ticker>,
        period: Period,
        now: DateTime<Utc>,
    ) -> Vec<(Ticker, Result<AnalysisResult, AnalysisError>)> {
        let mut tasks = JoinSet::new();
        for (idx, ticker) in tickers.iter().cloned().enumerate() {
            let orchestrator = Arc::clone(&self);
            tasks.spawn(async move {
                let result = orchestrator.analyze(&ticker, period, now).await;
                (idx, result)
            });
        }

        let mut slots: Vec<Option<Result<AnalysisResult, AnalysisError>>> =
            tickers.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => error!("Analysis task failed: {}", e),
            }
        }

        tickers
            .into_iter()
            .zip(slots)
            .map(|(ticker, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(AnalysisError::DataUnavailable {
                        ticker: ticker.clone(),
                        reason: "analysis task aborted".to_string(),
                    })
                });
                (ticker, result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarKind;
    use crate::provider::ProviderError;
    use crate::updater::tests::{weekday_bars, ScriptedProvider};
    use crate::Bar;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn orchestrator(dir: &TempDir, history: Vec<Bar>) -> AnalysisOrchestrator<ScriptedProvider> {
        let mut config = Config::default();
        config.cache.dir = dir.path().to_path_buf();
        AnalysisOrchestrator::new(ScriptedProvider::with_history(history), config)
    }

    #[test]
    fn test_single_bar_has_zero_change() {
        let series = PriceSeries::new(vec![Bar::new_unchecked(
            date(2024, 6, 3),
            10.0,
            11.0,
            9.0,
            10.5,
            42,
        )])
        .unwrap();
        let nyse = MarketCalendar::new(CalendarKind::EquityUs);
        let now = Utc.with_ymd_and_hms(2024, 6, 4, 1, 0, 0).unwrap();

        let result = analyze_series(&Ticker::new("x"), Period::OneDay, &series, &nyse, now, &Config::default())
            .unwrap();
        assert_eq!(result.price_change_1d, 0.0);
        assert_eq!(result.price_change_pct_1d, 0.0);
        assert_eq!(result.sma_20, None);
        assert_eq!(result.price_vs_sma_50, PricePosition::NotAvailable);
        assert_eq!(result.trend, Trend::Neutral);
        assert!(result.insufficient_history.contains(&"sma_20".to_string()));
        assert_eq!(result.day_label.as_str(), "Monday");
    }

    #[test]
    fn test_empty_series_is_error() {
        let nyse = MarketCalendar::new(CalendarKind::EquityUs);
        let err = analyze_series(
            &Ticker::new("X"),
            Period::OneYear,
            &PriceSeries::default(),
            &nyse,
            Utc::now(),
            &Config::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::EmptySeries(_)));
    }

    #[test]
    fn test_rounding() {
        let bars = weekday_bars(date(2024, 1, 1), 40, 100.123456, 0.333333);
        let series = PriceSeries::new(bars).unwrap();
        let nyse = MarketCalendar::new(CalendarKind::EquityUs);
        let result = analyze_series(&Ticker::new("R"), Period::ThreeMonths, &series, &nyse, Utc::now(), &Config::default())
            .unwrap()
            .rounded();

        let two_places = |v: f64| ((v * 100.0).round() - v * 100.0).abs() < 1e-6;
        assert!(two_places(result.current_price));
        assert!(two_places(result.sma_20.unwrap()));
        let macd = result.macd.unwrap();
        assert!(((macd * 10_000.0).round() - macd * 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_serialized_field_names() {
        let bars = weekday_bars(date(2024, 1, 1), 30, 50.0, 0.1);
        let series = PriceSeries::new(bars).unwrap();
        let nyse = MarketCalendar::new(CalendarKind::EquityUs);
        let result = analyze_series(&Ticker::new("abc"), Period::OneMonth, &series, &nyse, Utc::now(), &Config::default())
            .unwrap();

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["ticker"], "ABC");
        assert_eq!(json["period"], "1mo");
        assert!(json["ema_8"].is_number());
        assert!(json["ema_21"].is_number());
        assert!(json["sma_200"].is_null());
        assert_eq!(json["price_vs_sma_200"], "N/A");
        assert!(json["support_levels"].is_array());
        assert!(json["support_levels"][0]["sources"].is_array());
    }

    #[tokio::test]
    async fn test_analyze_reports_stale_warning() {
        let dir = TempDir::new().unwrap();
        let history = weekday_bars(date(2024, 1, 1), 80, 100.0, 0.2);
        let orch = orchestrator(&dir, history.clone());
        let ticker = Ticker::new("AAPL");
        let now = Utc.from_utc_datetime(&history[79].date.and_hms_opt(21, 0, 0).unwrap());

        let first = orch.analyze(&ticker, Period::OneYear, now).await.unwrap();
        assert!(first.warnings.is_empty());

        let later = now + chrono::Duration::days(3);
        orch.provider.fail_next(ProviderError::DataUnavailable("offline".into()));
        let second = orch.analyze(&ticker, Period::OneYear, later).await.unwrap();
        assert_eq!(second.warnings.len(), 1);
        assert_eq!(second.as_of, first.as_of);
    }

    #[tokio::test]
    async fn test_analyze_many_keeps_order() {
        let dir = TempDir::new().unwrap();
        let history = weekday_bars(date(2024, 1, 1), 60, 30.0, 0.1);
        let orch = Arc::new(orchestrator(&dir, history.clone()));
        let now = Utc.from_utc_datetime(&history[59].date.and_hms_opt(21, 0, 0).unwrap());

        let tickers = vec![Ticker::new("MSFT"), Ticker::new("AAPL"), Ticker::new("BTC-USD")];
        let results = orch.analyze_many(tickers.clone(), Period::SixMonths, now).await;

        let order: Vec<Ticker> = results.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(order, tickers);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn test_calendar_override() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, vec![]);
        assert_eq!(orch.calendar_for(&Ticker::new("ETH-USD")).kind(), CalendarKind::Crypto);
        orch.config.calendar = Some(CalendarKind::EquityUs);
        assert_eq!(orch.calendar_for(&Ticker::new("ETH-USD")).kind(), CalendarKind::EquityUs);
    }
}
