//! Support and resistance detection
//!
//! Candidate prices come from four independent signals over the recent
//! history:
//! - swing highs/lows: local extremes dominating `swing_width` bars on each side
//! - volume profile: price buckets holding an outsized share of traded volume
//! - MA cluster: SMA-50 and SMA-200 sitting close together
//! - range extremes: highest highs / lowest lows of the last `range_window` bars
//!
//! Candidates within `merge_tolerance` of each other collapse into one
//! [`Level`] whose strength is the number of candidates it absorbed. Levels
//! above the current price are resistance, the rest support; each side is
//! sorted nearest first and capped at `max_per_side`.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::LevelConfig;
use crate::indicators::sma;
use crate::{Bar, PriceSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Support,
    Resistance,
}

/// Signal that proposed a candidate price
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    SwingHigh,
    SwingLow,
    VolumeCluster,
    MaCluster,
    RangeExtreme,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Level {
    pub price: f64,
    #[serde(skip_serializing)]
    pub kind: LevelKind,
    /// Number of candidates merged into this level
    pub strength: usize,
    pub sources: BTreeSet<LevelSource>,
}

impl Level {
    pub fn rounded(&self) -> Self {
        Level {
            price: (self.price * 100.0).round() / 100.0,
            ..self.clone()
        }
    }
}

/// Detected levels, each side ordered nearest-first from the current price
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelSet {
    pub support: Vec<Level>,
    pub resistance: Vec<Level>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub price: f64,
    pub source: LevelSource,
}

#[derive(Debug, Clone, Default)]
pub struct LevelDetector {
    config: LevelConfig,
}

impl LevelDetector {
    pub fn new(config: LevelConfig) -> Self {
        LevelDetector { config }
    }

    pub fn detect(&self, series: &PriceSeries) -> LevelSet {
        let Some(current) = series.last().map(|b| b.close) else {
            return LevelSet::default();
        };
        let candidates = self.candidates(series);
        let merged = merge_candidates(candidates, self.config.merge_tolerance);
        classify(merged, current, self.config.max_per_side)
    }

    /// Every raw candidate price, before merging
    pub fn candidates(&self, series: &PriceSeries) -> Vec<Candidate> {
        let bars = series.bars();
        let window = &bars[bars.len().saturating_sub(self.config.lookback)..];
        let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = window.iter().map(|b| b.low).collect();

        let mut candidates = Vec::new();

        candidates.extend(
            swing_highs(&highs, self.config.swing_width)
                .into_iter()
                .map(|i| Candidate {
                    price: highs[i],
                    source: LevelSource::SwingHigh,
                }),
        );
        candidates.extend(
            swing_lows(&lows, self.config.swing_width)
                .into_iter()
                .map(|i| Candidate {
                    price: lows[i],
                    source: LevelSource::SwingLow,
                }),
        );

        let profile = volume_profile(window, self.config.volume_buckets);
        candidates.extend(
            volume_clusters(&profile, self.config.volume_threshold)
                .into_iter()
                .map(|price| Candidate {
                    price,
                    source: LevelSource::VolumeCluster,
                }),
        );

        // Moving averages use the full series: SMA-200 needs more than the lookback
        let closes = series.closes();
        let last_sma = |p: usize| sma(&closes, p).last().copied().flatten();
        if let Some(price) = ma_cluster(last_sma(50), last_sma(200), self.config.ma_cluster_tolerance)
        {
            candidates.push(Candidate {
                price,
                source: LevelSource::MaCluster,
            });
        }

        candidates.extend(range_extremes(bars, self.config.range_window, self.config.max_per_side));
        candidates
    }
}

/// Indices whose value is >= every value in the `width` bars before and
/// strictly > every value in the `width` bars after.
///
/// Among equal neighbouring peaks only the most recent qualifies. The last
/// `width` bars cannot be confirmed yet and are never reported.
pub fn swing_highs(values: &[f64], width: usize) -> Vec<usize> {
    swing_points(values, width, |center, left| center >= left, |center, right| center > right)
}

/// Mirror of [`swing_highs`] for troughs
pub fn swing_lows(values: &[f64], width: usize) -> Vec<usize> {
    swing_points(values, width, |center, left| center <= left, |center, right| center < right)
}

fn swing_points(
    values: &[f64],
    width: usize,
    beats_left: impl Fn(f64, f64) -> bool,
    beats_right: impl Fn(f64, f64) -> bool,
) -> Vec<usize> {
    if width == 0 || values.len() < 2 * width + 1 {
        return vec![];
    }

    (width..values.len() - width)
        .filter(|&i| {
            let center = values[i];
            values[i - width..i].iter().all(|&v| beats_left(center, v))
                && values[i + 1..=i + width].iter().all(|&v| beats_right(center, v))
        })
        .collect()
}

/// Volume traded per price bucket over the observed range.
///
/// Returns `(bucket midpoint, volume)` per bucket. Each bar's volume is split
/// evenly across the buckets its high-low range spans. Empty when the window
/// has no price range.
pub fn volume_profile(bars: &[Bar], buckets: usize) -> Vec<(f64, f64)> {
    let lo = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let hi = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    if buckets == 0 || !(hi > lo) {
        return vec![];
    }

    let width = (hi - lo) / buckets as f64;
    let bucket_of = |price: f64| (((price - lo) / width) as usize).min(buckets - 1);

    let mut volume = vec![0.0; buckets];
    for bar in bars {
        let first = bucket_of(bar.low);
        let last = bucket_of(bar.high);
        let share = bar.volume as f64 / (last - first + 1) as f64;
        for v in &mut volume[first..=last] {
            *v += share;
        }
    }

    volume
        .into_iter()
        .enumerate()
        .map(|(i, v)| (lo + width * (i as f64 + 0.5), v))
        .collect()
}

/// Bucket prices whose volume is strictly above `threshold` times the mean bucket volume
pub fn volume_clusters(profile: &[(f64, f64)], threshold: f64) -> Vec<f64> {
    if profile.is_empty() {
        return vec![];
    }
    let mean = profile.iter().map(|(_, v)| v).sum::<f64>() / profile.len() as f64;
    profile
        .iter()
        .filter(|&&(_, v)| v > 0.0 && v > threshold * mean)
        .map(|&(price, _)| price)
        .collect()
}

/// Mean of the two averages when they lie within `tolerance` (relative) of each other
pub fn ma_cluster(sma_50: Option<f64>, sma_200: Option<f64>, tolerance: f64) -> Option<f64> {
    let (a, b) = (sma_50?, sma_200?);
    let mid = (a + b) / 2.0;
    if mid > 0.0 && (a - b).abs() / mid <= tolerance {
        Some(mid)
    } else {
        None
    }
}

/// The `count` highest distinct highs and lowest distinct lows of the last `window` bars
pub fn range_extremes(bars: &[Bar], window: usize, count: usize) -> Vec<Candidate> {
    let recent = &bars[bars.len().saturating_sub(window)..];

    let mut highs: Vec<f64> = recent.iter().map(|b| b.high).collect();
    highs.sort_by(|a, b| b.total_cmp(a));
    highs.dedup();

    let mut lows: Vec<f64> = recent.iter().map(|b| b.low).collect();
    lows.sort_by(|a, b| a.total_cmp(b));
    lows.dedup();

    highs
        .into_iter()
        .take(count)
        .chain(lows.into_iter().take(count))
        .map(|price| Candidate {
            price,
            source: LevelSource::RangeExtreme,
        })
        .collect()
}

/// Collapse candidates lying within `tolerance` (relative to the running
/// cluster mean) into single levels. The level price is the cluster mean.
pub fn merge_candidates(mut candidates: Vec<Candidate>, tolerance: f64) -> Vec<Level> {
    candidates.sort_by(|a, b| a.price.total_cmp(&b.price));

    let mut clusters: Vec<Vec<Candidate>> = Vec::new();
    for candidate in candidates {
        match clusters.last_mut() {
            Some(cluster) if within(cluster_mean(cluster), candidate.price, tolerance) => {
                cluster.push(candidate)
            }
            _ => clusters.push(vec![candidate]),
        }
    }

    clusters
        .into_iter()
        .map(|cluster| Level {
            price: cluster_mean(&cluster),
            // provisional; set by `classify`
            kind: LevelKind::Support,
            strength: cluster.len(),
            sources: cluster.iter().map(|c| c.source).collect(),
        })
        .collect()
}

fn cluster_mean(cluster: &[Candidate]) -> f64 {
    cluster.iter().map(|c| c.price).sum::<f64>() / cluster.len() as f64
}

fn within(anchor: f64, price: f64, tolerance: f64) -> bool {
    anchor > 0.0 && (price - anchor).abs() / anchor <= tolerance
}

/// Split levels around `current` and keep the `max_per_side` nearest on each side
pub fn classify(levels: Vec<Level>, current: f64, max_per_side: usize) -> LevelSet {
    let (mut resistance, mut support): (Vec<Level>, Vec<Level>) =
        levels.into_iter().partition(|l| l.price > current);

    for level in &mut resistance {
        level.kind = LevelKind::Resistance;
    }
    for level in &mut support {
        level.kind = LevelKind::Support;
    }

    // nearest first; stronger level wins a distance tie
    resistance.sort_by(|a, b| a.price.total_cmp(&b.price).then(b.strength.cmp(&a.strength)));
    support.sort_by(|a, b| b.price.total_cmp(&a.price).then(b.strength.cmp(&a.strength)));
    resistance.truncate(max_per_side);
    support.truncate(max_per_side);

    LevelSet {
        support,
        resistance,
    }
}
