//! Configuration management
//!
//! Handles loading of the optional JSON configuration file, environment
//! variable overrides and validation of every tunable the pipeline uses.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calendar::CalendarKind;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub provider: ProviderConfig,
    pub indicators: IndicatorConfig,
    pub levels: LevelConfig,
    pub trend: TrendConfig,
    /// Forces one market calendar for every instrument instead of inferring it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<CalendarKind>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }

    /// Load the file if given (defaults otherwise), apply environment overrides
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)
                .with_context(|| format!("Failed to load config from {}", p.display()))?,
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override settings from `TA_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("TA_CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("TA_PROVIDER_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(secs) = std::env::var("TA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.provider.timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.indicators.validate()?;
        self.levels.validate()?;
        self.trend.validate()?;
        if self.provider.timeout_secs == 0 {
            anyhow::bail!("provider.timeout_secs must be > 0");
        }
        Ok(())
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            dir: PathBuf::from(".cache"),
        }
    }
}

/// Market-data provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Retries after the first failed attempt (1 = a single retry)
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub min_request_interval_ms: u64,
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            timeout_secs: 15,
            max_retries: 1,
            retry_backoff_ms: 500,
            min_request_interval_ms: 250,
            user_agent: concat!("technical-analysis/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

/// Indicator periods
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub sma_periods: Vec<usize>,
    pub ema_periods: Vec<usize>,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            sma_periods: vec![20, 50, 200],
            ema_periods: vec![8, 10, 21],
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std: 2.0,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sma_periods.iter().chain(&self.ema_periods).any(|&p| p == 0) {
            anyhow::bail!("indicator periods must be > 0");
        }
        for required in [20, 50, 200] {
            if !self.sma_periods.contains(&required) {
                anyhow::bail!("sma_periods must include {}", required);
            }
        }
        if self.rsi_period == 0 || self.macd_signal == 0 || self.bollinger_period == 0 {
            anyhow::bail!("rsi, macd signal and bollinger periods must be > 0");
        }
        if self.macd_fast == 0 || self.macd_fast >= self.macd_slow {
            anyhow::bail!(
                "macd_fast ({}) must be > 0 and < macd_slow ({})",
                self.macd_fast,
                self.macd_slow
            );
        }
        if !(self.bollinger_std.is_finite() && self.bollinger_std >= 0.0) {
            anyhow::bail!("bollinger_std must be a non-negative number");
        }
        Ok(())
    }
}

/// Support/resistance detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Most recent bars considered for swing points and volume profile
    pub lookback: usize,
    /// Bars on each side a swing high/low must dominate
    pub swing_width: usize,
    /// Number of price buckets in the volume profile
    pub volume_buckets: usize,
    /// A bucket is a candidate when its volume is above this multiple of the mean bucket volume
    pub volume_threshold: f64,
    /// Maximum relative distance between SMA-50 and SMA-200 to count as a cluster
    pub ma_cluster_tolerance: f64,
    /// Candidates within this relative distance are merged into one level
    pub merge_tolerance: f64,
    /// Bars scanned for the recent highest highs / lowest lows
    pub range_window: usize,
    /// Levels reported per side
    pub max_per_side: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        LevelConfig {
            lookback: 250,
            swing_width: 5,
            volume_buckets: 24,
            volume_threshold: 1.5,
            ma_cluster_tolerance: 0.02,
            merge_tolerance: 0.01,
            range_window: 50,
            max_per_side: 3,
        }
    }
}

impl LevelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.swing_width == 0 || self.volume_buckets == 0 || self.lookback == 0 {
            anyhow::bail!("levels.lookback, swing_width and volume_buckets must be > 0");
        }
        for (name, value) in [
            ("volume_threshold", self.volume_threshold),
            ("ma_cluster_tolerance", self.ma_cluster_tolerance),
            ("merge_tolerance", self.merge_tolerance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                anyhow::bail!("levels.{} must be a non-negative number", name);
            }
        }
        Ok(())
    }
}

/// Trend classification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Recent RSI values inspected for range-bound detection
    pub rsi_window: usize,
    pub rsi_lower: f64,
    pub rsi_upper: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        TrendConfig {
            rsi_window: 14,
            rsi_lower: 30.0,
            rsi_upper: 70.0,
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rsi_window == 0 {
            anyhow::bail!("trend.rsi_window must be > 0");
        }
        if !(0.0..=100.0).contains(&self.rsi_lower)
            || !(0.0..=100.0).contains(&self.rsi_upper)
            || self.rsi_lower >= self.rsi_upper
        {
            anyhow::bail!(
                "trend RSI band [{}, {}] must lie within [0, 100] with lower < upper",
                self.rsi_lower,
                self.rsi_upper
            );
        }
        Ok(())
    }
}
