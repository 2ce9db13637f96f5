//! Yahoo Finance chart API client for daily bars
//!
//! No API key required. Equities, ETFs, indices (`^GSPC`), crypto pairs
//! (`BTC-USD`) and forex pairs (`EURUSD=X`) share the same endpoint.
//!
//! # Example
//! ```no_run
//! use technical_analysis::config::ProviderConfig;
//! use technical_analysis::provider::{MarketDataProvider, YahooProvider};
//! use technical_analysis::{Period, Ticker};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = YahooProvider::new(&ProviderConfig::default())?;
//!     let today = chrono::Utc::now().date_naive();
//!     let bars = provider.fetch_period(&Ticker::new("AAPL"), Period::OneYear, today).await?;
//!     println!("Fetched {} bars", bars.len());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{MarketDataProvider, ProviderError};
use crate::common::{RateLimiter, RateLimiterConfig, RetryPolicy};
use crate::config::ProviderConfig;
use crate::{Bar, Period, Ticker};

/// Chart endpoint path under the configured base URL
const CHART_PATH: &str = "v8/finance/chart";

/// Longest error body echoed into an error message
const MAX_ERROR_BODY: usize = 200;

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    exchange_timezone_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteColumns {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// =============================================================================
// Client
// =============================================================================

/// Yahoo Finance daily-bar provider
#[derive(Debug)]
pub struct YahooProvider {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl YahooProvider {
    pub fn new(config: &ProviderConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(YahooProvider {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::new(config.max_retries, config.retry_backoff()),
            limiter: RateLimiter::new(
                RateLimiterConfig::default().with_min_interval(config.min_request_interval()),
            ),
        })
    }

    /// Issue one chart request (rate limited, retried on `DataUnavailable`)
    async fn get_chart(
        &self,
        ticker: &Ticker,
        params: &[(&str, String)],
    ) -> Result<Vec<Bar>, ProviderError> {
        let url = format!("{}/{}/{}", self.base_url, CHART_PATH, ticker);
        let this = self;
        let url = url.as_str();

        this.retry
            .execute(
                move || async move {
                    this.limiter.acquire().await;
                    debug!("Fetching chart: url={}, params={:?}", url, params);

                    let response = this
                        .client
                        .get(url)
                        .query(&[("interval", "1d"), ("includePrePost", "false")])
                        .query(params)
                        .send()
                        .await?;

                    let status = response.status();
                    let body = response.text().await?;
                    check_status(status, &body, ticker)?;

                    parse_chart(&body, ticker)
                },
                ProviderError::is_retryable,
            )
            .await
    }
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch(
        &self,
        ticker: &Ticker,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        // period2 is exclusive; cover the whole `end` session in any time zone
        let period1 = day_start_epoch(start.checked_sub_days(Days::new(1)).unwrap_or(start));
        let period2 = day_start_epoch(end.checked_add_days(Days::new(2)).unwrap_or(end));

        let bars = self
            .get_chart(
                ticker,
                &[
                    ("period1", period1.to_string()),
                    ("period2", period2.to_string()),
                ],
            )
            .await?;

        let bars: Vec<Bar> = bars
            .into_iter()
            .filter(|b| b.date >= start && b.date <= end)
            .collect();
        info!(
            "Fetched {} bars for {} ({} to {})",
            bars.len(),
            ticker,
            start,
            end
        );
        Ok(bars)
    }

    async fn fetch_period(
        &self,
        ticker: &Ticker,
        period: Period,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError> {
        let bars = self
            .get_chart(ticker, &[("range", period.as_str().to_string())])
            .await?;

        let bars: Vec<Bar> = bars.into_iter().filter(|b| b.date <= end).collect();
        info!("Fetched {} bars for {} (range {})", bars.len(), ticker, period);
        Ok(bars)
    }
}

fn day_start_epoch(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

// =============================================================================
// Parsing
// =============================================================================

/// Decode a chart payload into validated daily bars.
///
/// Timestamps are mapped to the exchange-local trading date. Rows with any
/// missing OHLC field (halted sessions, placeholder rows) are skipped, as are
/// rows failing bar validation.
/// 404 means the symbol does not exist; any other non-2xx is transient
fn check_status(status: StatusCode, body: &str, ticker: &Ticker) -> Result<(), ProviderError> {
    if status == StatusCode::NOT_FOUND {
        return Err(ProviderError::UnknownInstrument(ticker.to_string()));
    }
    if !status.is_success() {
        let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
        return Err(ProviderError::DataUnavailable(format!(
            "Yahoo API error {}: {}",
            status, snippet
        )));
    }
    Ok(())
}

fn parse_chart(body: &str, ticker: &Ticker) -> Result<Vec<Bar>, ProviderError> {
    let response: ChartResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::DataUnavailable(format!("Failed to parse chart response: {}", e))
    })?;

    if let Some(err) = response.chart.error {
        return Err(if err.code.eq_ignore_ascii_case("Not Found") {
            ProviderError::UnknownInstrument(ticker.to_string())
        } else {
            ProviderError::DataUnavailable(format!("{}: {}", err.code, err.description))
        });
    }

    let Some(data) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Err(ProviderError::DataUnavailable(format!(
            "Empty chart result for {}",
            ticker
        )));
    };

    let tz: Tz = match data.meta.exchange_timezone_name.as_deref() {
        Some(name) => name.parse().unwrap_or_else(|_| {
            warn!("Unknown exchange time zone {} for {}, using UTC", name, ticker);
            Tz::UTC
        }),
        None => Tz::UTC,
    };

    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let column = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();

    let mut bars = Vec::with_capacity(data.timestamp.len());
    let mut skipped = 0;

    for (i, &ts) in data.timestamp.iter().enumerate() {
        let (Some(open), Some(high), Some(low), Some(close)) = (
            column(&quote.open, i),
            column(&quote.high, i),
            column(&quote.low, i),
            column(&quote.close, i),
        ) else {
            skipped += 1;
            continue;
        };
        let Some(date) = Utc
            .timestamp_opt(ts, 0)
            .single()
            .map(|dt| dt.with_timezone(&tz).date_naive())
        else {
            skipped += 1;
            continue;
        };
        let volume = column(&quote.volume, i).unwrap_or(0.0).max(0.0).round() as u64;

        // Adjusted open/close can drift a hair outside the raw high-low range
        let outside = |p: f64| p < low || p > high;
        let (open, close) = if low <= high && (outside(open) || outside(close)) {
            warn!(
                "Clamping open/close of {} on {} into [{}, {}]",
                ticker, date, low, high
            );
            (open.clamp(low, high), close.clamp(low, high))
        } else {
            (open, close)
        };

        match Bar::new(date, open, high, low, close, volume) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                warn!("Skipping invalid bar for {} on {}: {}", ticker, date, e);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} incomplete rows for {}", skipped, ticker);
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": { "symbol": "AAPL", "exchangeTimezoneName": "America/New_York" },
                "timestamp": [1717075800, 1717162200, 1717421400],
                "indicators": {
                    "quote": [{
                        "open":   [190.76, 191.44, null],
                        "high":   [192.18, 192.57, 194.99],
                        "low":    [190.63, 189.91, 192.52],
                        "close":  [191.29, 192.25, 194.03],
                        "volume": [49947900, 75158300, 50080500]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let bars = parse_chart(SAMPLE, &Ticker::new("AAPL")).unwrap();
        // third row has a null open and is skipped
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 5, 30).unwrap());
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());
        assert_eq!(bars[1].close, 192.25);
        assert_eq!(bars[1].volume, 75_158_300);
    }

    #[test]
    fn test_exchange_time_zone_decides_date() {
        // 2024-05-31 23:30 UTC is already June 1st in Tokyo
        let body = r#"{"chart":{"result":[{
            "meta":{"exchangeTimezoneName":"Asia/Tokyo"},
            "timestamp":[1717198200],
            "indicators":{"quote":[{"open":[10.0],"high":[11.0],"low":[9.0],"close":[10.5],"volume":[null]}]}
        }],"error":null}}"#;

        let bars = parse_chart(body, &Ticker::new("7203.T")).unwrap();
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(bars[0].volume, 0);
    }

    #[test]
    fn test_not_found_is_unknown_instrument() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = parse_chart(body, &Ticker::new("NOPE")).unwrap_err();
        assert_eq!(err, ProviderError::UnknownInstrument("NOPE".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_error_is_unavailable() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Internal Server Error","description":"boom"}}}"#;
        let err = parse_chart(body, &Ticker::new("AAPL")).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_garbage_is_unavailable() {
        let err = parse_chart("<html>rate limited</html>", &Ticker::new("AAPL")).unwrap_err();
        assert!(matches!(err, ProviderError::DataUnavailable(_)));
    }

    #[test]
    fn test_invalid_bar_is_skipped() {
        let body = r#"{"chart":{"result":[{
            "meta":{"exchangeTimezoneName":"America/New_York"},
            "timestamp":[1717075800, 1717162200],
            "indicators":{"quote":[{"open":[10.0, 10.0],"high":[9.0, 11.0],"low":[11.0, 9.0],"close":[10.0, 10.0],"volume":[1, 2]}]}
        }],"error":null}}"#;
        let bars = parse_chart(body, &Ticker::new("X")).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].volume, 2);
    }

    #[test]
    fn test_open_close_outside_range_are_clamped() {
        let body = r#"{"chart":{"result":[{
            "meta":{"exchangeTimezoneName":"America/New_York"},
            "timestamp":[1717075800],
            "indicators":{"quote":[{"open":[8.99],"high":[11.0],"low":[9.0],"close":[11.02],"volume":[5]}]}
        }],"error":null}}"#;
        let bars = parse_chart(body, &Ticker::new("X")).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, 9.0);
        assert_eq!(bars[0].close, 11.0);
    }

    #[test]
    fn test_status_mapping() {
        let ticker = Ticker::new("AAPL");
        assert_eq!(check_status(StatusCode::OK, "", &ticker), Ok(()));
        assert_eq!(
            check_status(StatusCode::NOT_FOUND, "", &ticker),
            Err(ProviderError::UnknownInstrument("AAPL".to_string()))
        );
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::UNAUTHORIZED,
        ] {
            let err = check_status(status, "Too Many Requests", &ticker).unwrap_err();
            assert!(matches!(err, ProviderError::DataUnavailable(_)), "{}", status);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_no_timestamps_is_empty() {
        let body = r#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse_chart(body, &Ticker::new("SPY")).unwrap().is_empty());
    }
}
