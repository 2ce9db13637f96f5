//! Trend classification
//!
//! Decision table over the latest close, SMA-50, SMA-200, the MACD histogram
//! and the recent RSI band:
//!
//! | label         | condition                                                    |
//! |---------------|--------------------------------------------------------------|
//! | `bullish`     | price above SMA-50 and SMA-200, histogram ≥ 0 (see below)    |
//! | `bearish`     | price below SMA-50, histogram < 0 (see below)                |
//! | `range-bound` | neither, and every RSI of the recent window inside [30, 70]  |
//! | `neutral`     | anything else, including missing inputs                      |
//!
//! The histogram sign is read with a tolerance of `1e-9 × max(|price|, 1)`:
//! on a perfectly linear series MACD and its signal agree exactly in theory, but
//! the computed histogram is floating-point noise around zero. Anything inside
//! that band counts as zero, so it is bullish-compatible and never bearish.

use serde::Serialize;

use crate::config::TrendConfig;
use crate::indicators::IndicatorFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
    RangeBound,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Neutral => write!(f, "neutral"),
            Trend::RangeBound => write!(f, "range-bound"),
        }
    }
}

/// Where the price sits relative to a moving average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PricePosition {
    #[serde(rename = "above")]
    Above,
    #[serde(rename = "below")]
    Below,
    /// The average is undefined (not enough history)
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl PricePosition {
    pub fn of(price: f64, average: Option<f64>) -> Self {
        match average {
            Some(avg) if price > avg => PricePosition::Above,
            Some(_) => PricePosition::Below,
            None => PricePosition::NotAvailable,
        }
    }
}

impl std::fmt::Display for PricePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricePosition::Above => write!(f, "above"),
            PricePosition::Below => write!(f, "below"),
            PricePosition::NotAvailable => write!(f, "N/A"),
        }
    }
}

/// Latest-bar inputs to the decision table
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendInputs<'a> {
    pub price: f64,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub macd_histogram: Option<f64>,
    /// RSI values of the most recent bars, oldest first
    pub recent_rsi: &'a [Option<f64>],
}

#[derive(Debug, Clone, Default)]
pub struct TrendClassifier {
    config: TrendConfig,
}

impl TrendClassifier {
    pub fn new(config: TrendConfig) -> Self {
        TrendClassifier { config }
    }

    /// Classify the last bar of an indicator frame
    pub fn classify_frame(&self, frame: &IndicatorFrame, price: f64) -> Trend {
        let Some(latest) = frame.latest() else {
            return Trend::Neutral;
        };
        let rsi = frame.rsi_series();
        let recent_rsi = &rsi[rsi.len().saturating_sub(self.config.rsi_window)..];

        self.classify(&TrendInputs {
            price,
            sma_50: latest.sma(50),
            sma_200: latest.sma(200),
            macd_histogram: latest.macd_histogram,
            recent_rsi,
        })
    }

    pub fn classify(&self, inputs: &TrendInputs<'_>) -> Trend {
        let price = inputs.price;
        let eps = 1e-9 * price.abs().max(1.0);

        if let (Some(sma_50), Some(sma_200), Some(hist)) =
            (inputs.sma_50, inputs.sma_200, inputs.macd_histogram)
        {
            if price > sma_50 && price > sma_200 && hist >= -eps {
                return Trend::Bullish;
            }
        }

        if let (Some(sma_50), Some(hist)) = (inputs.sma_50, inputs.macd_histogram) {
            if price < sma_50 && hist < -eps {
                return Trend::Bearish;
            }
        }

        if self.rsi_in_band(inputs.recent_rsi) {
            return Trend::RangeBound;
        }

        Trend::Neutral
    }

    fn rsi_in_band(&self, recent: &[Option<f64>]) -> bool {
        recent.len() >= self.config.rsi_window
            && recent.iter().all(|v| {
                v.is_some_and(|rsi| rsi >= self.config.rsi_lower && rsi <= self.config.rsi_upper)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndicatorConfig;
    use crate::{Bar, PriceSeries};
    use chrono::{Duration, NaiveDate};

    fn frame_for(closes: &[f64]) -> IndicatorFrame {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new_unchecked(start + Duration::days(i as i64), c, c, c, c, 100))
            .collect();
        IndicatorFrame::compute(&PriceSeries::new(bars).unwrap(), &IndicatorConfig::default())
    }

    fn inputs(price: f64, sma_50: f64, sma_200: f64, hist: f64) -> TrendInputs<'static> {
        TrendInputs {
            price,
            sma_50: Some(sma_50),
            sma_200: Some(sma_200),
            macd_histogram: Some(hist),
            recent_rsi: &[],
        }
    }

    #[test]
    fn test_decision_table() {
        let classifier = TrendClassifier::default();

        assert_eq!(classifier.classify(&inputs(110.0, 100.0, 90.0, 0.5)), Trend::Bullish);
        assert_eq!(classifier.classify(&inputs(110.0, 100.0, 90.0, 0.0)), Trend::Bullish);
        // Rounding noise reads as zero; a real negative histogram does not
        assert_eq!(classifier.classify(&inputs(110.0, 100.0, 90.0, -1e-8)), Trend::Bullish);
        assert_eq!(classifier.classify(&inputs(110.0, 100.0, 90.0, -1e-6)), Trend::Neutral);
        assert_eq!(classifier.classify(&inputs(90.0, 100.0, 80.0, -1e-8)), Trend::Neutral);
        assert_eq!(classifier.classify(&inputs(90.0, 100.0, 80.0, -0.5)), Trend::Bearish);
        // Above both averages but momentum fading
        assert_eq!(classifier.classify(&inputs(110.0, 100.0, 90.0, -0.5)), Trend::Neutral);
        // Mixed averages
        assert_eq!(classifier.classify(&inputs(95.0, 100.0, 90.0, 0.5)), Trend::Neutral);
        assert_eq!(classifier.classify(&inputs(105.0, 100.0, 110.0, 0.5)), Trend::Neutral);
    }

    #[test]
    fn test_missing_inputs_are_neutral() {
        let classifier = TrendClassifier::default();
        let no_long_average = TrendInputs {
            price: 110.0,
            sma_50: Some(100.0),
            sma_200: None,
            macd_histogram: Some(1.0),
            recent_rsi: &[],
        };
        assert_eq!(classifier.classify(&no_long_average), Trend::Neutral);
        assert_eq!(classifier.classify(&TrendInputs::default()), Trend::Neutral);
    }

    #[test]
    fn test_range_bound_needs_full_window_in_band() {
        let classifier = TrendClassifier::default();
        let in_band = vec![Some(45.0); 14];
        let mut inputs = inputs(95.0, 100.0, 90.0, 0.5);

        inputs.recent_rsi = &in_band;
        assert_eq!(classifier.classify(&inputs), Trend::RangeBound);

        let mut spiked = in_band.clone();
        spiked[3] = Some(75.0);
        inputs.recent_rsi = &spiked;
        assert_eq!(classifier.classify(&inputs), Trend::Neutral);

        let short = vec![Some(45.0); 5];
        inputs.recent_rsi = &short;
        assert_eq!(classifier.classify(&inputs), Trend::Neutral);
    }

    #[test]
    fn test_linear_rise_is_bullish() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + 150.0 * i as f64 / 299.0).collect();
        let frame = frame_for(&closes);
        let trend = TrendClassifier::default().classify_frame(&frame, closes[299]);
        assert_eq!(trend, Trend::Bullish);
    }

    #[test]
    fn test_accelerating_decline_is_bearish() {
        let closes: Vec<f64> = (0..260).map(|i| 400.0 - 0.004 * (i * i) as f64).collect();
        let frame = frame_for(&closes);
        let trend = TrendClassifier::default().classify_frame(&frame, closes[259]);
        assert_eq!(trend, Trend::Bearish);
    }

    #[test]
    fn test_short_history_is_neutral() {
        let closes = vec![10.0, 11.0, 12.0];
        let frame = frame_for(&closes);
        assert_eq!(TrendClassifier::default().classify_frame(&frame, 12.0), Trend::Neutral);
    }

    #[test]
    fn test_price_position() {
        assert_eq!(PricePosition::of(10.0, Some(9.0)), PricePosition::Above);
        assert_eq!(PricePosition::of(9.0, Some(9.0)), PricePosition::Below);
        assert_eq!(PricePosition::of(9.0, None), PricePosition::NotAvailable);
        assert_eq!(serde_json::to_string(&PricePosition::NotAvailable).unwrap(), "\"N/A\"");
    }

    #[test]
    fn test_trend_serialization() {
        assert_eq!(serde_json::to_string(&Trend::RangeBound).unwrap(), "\"range-bound\"");
        assert_eq!(Trend::Bearish.to_string(), "bearish");
    }
}
