//! Ordered daily price series for one instrument
//!
//! A `PriceSeries` is the substrate every computation reads. Dates are strictly
//! increasing; past bars are never edited, except that a merge may replace the
//! bars the provider re-sends (the latest session may still be provisional).

use chrono::NaiveDate;
use itertools::Itertools;
use thiserror::Error;

use crate::Bar;

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("bar {index} ({date}) is not after the previous bar")]
    NotIncreasing { index: usize, date: NaiveDate },

    #[error("duplicate bar for {0}")]
    DuplicateDate(NaiveDate),

    #[error("invalid bar at {date}: {reason}")]
    InvalidBar { date: NaiveDate, reason: String },
}

/// Summary of what a merge did to the series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Bars appended after the previous last date
    pub appended: usize,
    /// Existing bars replaced by a re-fetched bar for the same date
    pub replaced: usize,
    /// Fetched bars older than the cached tail that did not match a cached date
    pub ignored: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series from bars already in ascending date order.
    ///
    /// Rejects out-of-order or duplicate dates and invalid bars.
    pub fn new(bars: Vec<Bar>) -> Result<Self, SeriesError> {
        for (index, (prev, next)) in bars.iter().tuple_windows().enumerate() {
            if next.date == prev.date {
                return Err(SeriesError::DuplicateDate(next.date));
            }
            if next.date < prev.date {
                return Err(SeriesError::NotIncreasing {
                    index: index + 1,
                    date: next.date,
                });
            }
        }
        if let Some(bad) = bars.iter().find(|b| !b.is_valid()) {
            let reason = bad
                .validate()
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(SeriesError::InvalidBar {
                date: bad.date,
                reason,
            });
        }
        Ok(Self { bars })
    }

    /// Build a series from provider output: sort by date, keep the last bar
    /// seen for any repeated date.
    pub fn from_unsorted(mut bars: Vec<Bar>) -> Result<Self, SeriesError> {
        // Stable sort keeps provider order among equal dates; reverse + dedup keeps the last one.
        bars.sort_by_key(|b| b.date);
        bars.reverse();
        bars.dedup_by_key(|b| b.date);
        bars.reverse();
        Self::new(bars)
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.date).collect()
    }

    /// Index of the bar for `date`, if present
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.bars.binary_search_by_key(&date, |b| b.date).ok()
    }

    /// Prefix of the series ending at (and including) `date`
    pub fn up_to(&self, date: NaiveDate) -> PriceSeries {
        let end = self.bars.partition_point(|b| b.date <= date);
        PriceSeries {
            bars: self.bars[..end].to_vec(),
        }
    }

    /// Merge freshly fetched bars into the series.
    ///
    /// Bars dated after the current tail are appended in order. A fetched bar
    /// whose date already exists replaces the cached bar for that date only.
    /// Fetched bars older than the tail with no cached counterpart would open a
    /// hole in history and are ignored.
    pub fn merge(&mut self, fetched: Vec<Bar>) -> MergeStats {
        let mut stats = MergeStats::default();
        let valid: Vec<Bar> = fetched.into_iter().filter(Bar::is_valid).collect();
        let incoming = PriceSeries::from_unsorted(valid)
            .map(|s| s.bars)
            .unwrap_or_default();

        for bar in incoming {
            match self.last_date() {
                Some(last) if bar.date <= last => match self.position(bar.date) {
                    Some(idx) => {
                        if self.bars[idx] != bar {
                            self.bars[idx] = bar;
                            stats.replaced += 1;
                        }
                    }
                    None => stats.ignored += 1,
                },
                _ => {
                    self.bars.push(bar);
                    stats.appended += 1;
                }
            }
        }

        stats
    }
}

impl TryFrom<Vec<Bar>> for PriceSeries {
    type Error = SeriesError;

    fn try_from(bars: Vec<Bar>) -> Result<Self, Self::Error> {
        PriceSeries::new(bars)
    }
}
