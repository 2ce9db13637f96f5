//! Technical indicators over a daily close series
//!
//! Every function returns one slot per input bar. A slot is `None` until the
//! indicator's lookback is filled, and the value at index `i` only ever reads
//! inputs `0..=i`.
//!
//! Available indicators:
//! - Moving Averages: SMA (via the `ta` crate), EMA seeded with the SMA of the first `n` bars
//! - Momentum: RSI with Wilder's smoothing, MACD
//! - Volatility: Bollinger Bands with population standard deviation (via `statrs`)

use chrono::NaiveDate;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::config::IndicatorConfig;
use crate::PriceSeries;

// =============================================================================
// Type Aliases for Complex Return Types
// =============================================================================

/// Type alias for band indicators (upper, middle, lower)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// MACD line, signal line and histogram
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdOutput {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut result = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let sma_val = indicator.next(value);
        if i + 1 >= period {
            result.push(Some(sma_val));
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate Exponential Moving Average
///
/// Smoothing factor α = 2/(n+1). The first value is the SMA of the first `n`
/// inputs, then `EMA[t] = value[t]·α + EMA[t-1]·(1-α)`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(values.len());
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[0..period].iter().sum();
            ema_value = Some(sum / period as f64);
            result.push(ema_value);
        } else if let Some(prev) = ema_value {
            let next = value * alpha + prev * (1.0 - alpha);
            ema_value = Some(next);
            result.push(ema_value);
        }
    }

    result
}

/// EMA over a series with a warm-up prefix of `None`s (e.g. the MACD line).
/// The output keeps the input length.
fn ema_of_defined(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let offset = values.iter().take_while(|v| v.is_none()).count();
    let defined: Vec<f64> = values[offset..].iter().map_while(|v| *v).collect();

    let mut result = vec![None; offset];
    result.extend(ema(&defined, period));
    result.resize(values.len(), None);
    result
}

// =============================================================================
// Momentum
// =============================================================================

/// Apply Wilder's smoothing to a series
/// Wilder's smoothing: new_value = (prev_value * (period - 1) + current) / period
fn wilders_smooth(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut result = Vec::with_capacity(values.len());
    let mut smoothed: Option<f64> = None;

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            // First value is SMA
            let sum: f64 = values[0..period].iter().sum();
            smoothed = Some(sum / period as f64);
            result.push(smoothed);
        } else if let Some(prev) = smoothed {
            let new_val = (prev * (period - 1) as f64 + values[i]) / period as f64;
            smoothed = Some(new_val);
            result.push(smoothed);
        } else {
            result.push(None);
        }
    }

    result
}

/// Calculate RSI (Relative Strength Index) with Wilder's smoothing
///
/// The first value appears at index `period` (it needs `period` price changes).
/// A window without losses reads 100.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = values
        .windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            (change.max(0.0), (-change).max(0.0))
        })
        .unzip();

    let avg_gains = wilders_smooth(&gains, period);
    let avg_losses = wilders_smooth(&losses, period);

    let mut result = Vec::with_capacity(values.len());
    result.push(None);

    for (avg_gain, avg_loss) in avg_gains.into_iter().zip(avg_losses) {
        let rsi_val = match (avg_gain, avg_loss) {
            (Some(_), Some(loss)) if loss == 0.0 => Some(100.0),
            (Some(gain), Some(loss)) => {
                let rs = gain / loss;
                Some(100.0 - 100.0 / (1.0 + rs))
            }
            _ => None,
        };
        result.push(rsi_val);
    }

    result
}

/// Calculate MACD: line = EMA(fast) - EMA(slow), signal = EMA(signal) of the
/// line, histogram = line - signal
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdOutput {
    if values.is_empty() {
        return MacdOutput::default();
    }

    let fast = ema(values, fast_period);
    let slow = ema(values, slow_period);

    let line: Vec<Option<f64>> = fast
        .iter()
        .zip(&slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal = ema_of_defined(&line, signal_period);
    let histogram = line
        .iter()
        .zip(&signal)
        .map(|(l, s)| Some((*l)? - (*s)?))
        .collect();

    MacdOutput {
        line,
        signal,
        histogram,
    }
}

// =============================================================================
// Volatility
// =============================================================================

/// Calculate Bollinger Bands: SMA middle band, ± `num_std` population
/// standard deviations of the same window
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    let middle = sma(values, period);
    let mut upper = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for (i, mid) in middle.iter().enumerate() {
        match mid {
            Some(mid) => {
                let window = &values[i + 1 - period..=i];
                let std_dev = window.iter().population_std_dev();
                upper.push(Some(mid + num_std * std_dev));
                lower.push(Some(mid - num_std * std_dev));
            }
            None => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    (upper, middle, lower)
}

// =============================================================================
// Indicator Frame
// =============================================================================

/// All configured indicators computed over one series, aligned with its bars
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    dates: Vec<NaiveDate>,
    sma: BTreeMap<usize, Vec<Option<f64>>>,
    ema: BTreeMap<usize, Vec<Option<f64>>>,
    rsi_period: usize,
    rsi: Vec<Option<f64>>,
    macd: MacdOutput,
    bollinger_period: usize,
    bollinger: BandOutput,
}

/// Indicator values as of one date
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub date: NaiveDate,
    pub sma: BTreeMap<usize, Option<f64>>,
    pub ema: BTreeMap<usize, Option<f64>>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn sma(&self, period: usize) -> Option<f64> {
        self.sma.get(&period).copied().flatten()
    }

    pub fn ema(&self, period: usize) -> Option<f64> {
        self.ema.get(&period).copied().flatten()
    }
}

impl IndicatorFrame {
    /// Compute every configured indicator over the closes of `series`
    pub fn compute(series: &PriceSeries, config: &IndicatorConfig) -> Self {
        let closes = series.closes();

        let sma = config
            .sma_periods
            .iter()
            .map(|&p| (p, sma(&closes, p)))
            .collect();
        let ema = config
            .ema_periods
            .iter()
            .map(|&p| (p, ema(&closes, p)))
            .collect();

        IndicatorFrame {
            dates: series.dates(),
            sma,
            ema,
            rsi_period: config.rsi_period,
            rsi: rsi(&closes, config.rsi_period),
            macd: macd(
                &closes,
                config.macd_fast,
                config.macd_slow,
                config.macd_signal,
            ),
            bollinger_period: config.bollinger_period,
            bollinger: bollinger_bands(&closes, config.bollinger_period, config.bollinger_std),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn rsi_series(&self) -> &[Option<f64>] {
        &self.rsi
    }

    pub fn snapshot_at(&self, index: usize) -> Option<IndicatorSnapshot> {
        let date = *self.dates.get(index)?;
        let at = |v: &Vec<Option<f64>>| v.get(index).copied().flatten();

        Some(IndicatorSnapshot {
            date,
            sma: self.sma.iter().map(|(&p, v)| (p, at(v))).collect(),
            ema: self.ema.iter().map(|(&p, v)| (p, at(v))).collect(),
            rsi: at(&self.rsi),
            macd: at(&self.macd.line),
            macd_signal: at(&self.macd.signal),
            macd_histogram: at(&self.macd.histogram),
            bb_upper: at(&self.bollinger.0),
            bb_middle: at(&self.bollinger.1),
            bb_lower: at(&self.bollinger.2),
        })
    }

    pub fn at(&self, date: NaiveDate) -> Option<IndicatorSnapshot> {
        let index = self.dates.binary_search(&date).ok()?;
        self.snapshot_at(index)
    }

    pub fn latest(&self) -> Option<IndicatorSnapshot> {
        self.snapshot_at(self.len().checked_sub(1)?)
    }

    /// Indicators whose lookback exceeds the series, i.e. still undefined on the last bar
    pub fn insufficient_history(&self) -> Vec<String> {
        let Some(last) = self.len().checked_sub(1) else {
            return vec![];
        };
        let undefined = |v: &Vec<Option<f64>>| v.get(last).copied().flatten().is_none();

        let mut names = Vec::new();
        names.extend(
            self.sma
                .iter()
                .filter(|(_, v)| undefined(v))
                .map(|(p, _)| format!("sma_{}", p)),
        );
        names.extend(
            self.ema
                .iter()
                .filter(|(_, v)| undefined(v))
                .map(|(p, _)| format!("ema_{}", p)),
        );
        if undefined(&self.rsi) {
            names.push(format!("rsi_{}", self.rsi_period));
        }
        if undefined(&self.macd.line) {
            names.push("macd".to_string());
        }
        if undefined(&self.macd.signal) {
            names.push("macd_signal".to_string());
        }
        if undefined(&self.bollinger.1) {
            names.push(format!("bollinger_{}", self.bollinger_period));
        }
        names
    }
}
