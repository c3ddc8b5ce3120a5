// =============================================================================
// Shared types used across the synthetic market-data engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single hourly OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Start of the hour this bar covers.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// `low <= open <= high` and `low <= close <= high`, with every field
    /// finite and positive.
    pub fn is_consistent(&self) -> bool {
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return false;
        }
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

/// A complete bar series for one instrument, generated in a single pass.
///
/// Series are immutable once built. The cache hands them out as
/// `Arc<Series>` so a reader keeps its snapshot even after the producer has
/// swapped in a newer one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub instrument: String,
    /// The `now` the generator was called with.
    pub generated_at: DateTime<Utc>,
    pub bars: Vec<Bar>,
}

impl Series {
    pub fn new(instrument: impl Into<String>, generated_at: DateTime<Utc>, bars: Vec<Bar>) -> Self {
        Self {
            instrument: instrument.into(),
            generated_at,
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Most recent bar, if any.
    pub fn latest(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.first().map(|b| b.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.last().map(|b| b.timestamp)
    }

    /// Close prices in bar order (oldest first).
    pub fn close_prices(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Every bar is internally consistent and timestamps strictly increase.
    pub fn is_consistent(&self) -> bool {
        self.bars.iter().all(Bar::is_consistent)
            && self
                .bars
                .windows(2)
                .all(|w| w[0].timestamp < w[1].timestamp)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar(hour: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour),
            open,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn consistent_bar_passes() {
        assert!(bar(0, 100.0, 101.0, 99.0, 100.5).is_consistent());
        // Degenerate flat bar is still valid.
        assert!(bar(0, 100.0, 100.0, 100.0, 100.0).is_consistent());
    }

    #[test]
    fn close_outside_range_fails() {
        assert!(!bar(0, 100.0, 101.0, 99.0, 101.5).is_consistent());
        assert!(!bar(0, 100.0, 101.0, 99.0, 98.0).is_consistent());
    }

    #[test]
    fn open_above_high_fails() {
        assert!(!bar(0, 102.0, 101.0, 99.0, 100.0).is_consistent());
    }

    #[test]
    fn non_positive_or_nan_fails() {
        assert!(!bar(0, -1.0, 1.0, -2.0, 0.0).is_consistent());
        assert!(!bar(0, f64::NAN, 101.0, 99.0, 100.0).is_consistent());
    }

    #[test]
    fn series_accessors() {
        let series = Series::new(
            "bitcoin",
            Utc::now(),
            vec![bar(0, 100.0, 101.0, 99.0, 100.5), bar(1, 101.0, 102.0, 100.0, 101.5)],
        );
        assert_eq!(series.len(), 2);
        assert!(!series.is_empty());
        assert_eq!(series.close_prices(), vec![100.5, 101.5]);
        assert_eq!(series.latest().map(|b| b.close), Some(101.5));
        assert!(series.first_timestamp() < series.last_timestamp());
        assert!(series.is_consistent());
    }

    #[test]
    fn series_with_repeated_timestamp_is_inconsistent() {
        let series = Series::new(
            "bitcoin",
            Utc::now(),
            vec![bar(3, 100.0, 101.0, 99.0, 100.5), bar(3, 101.0, 102.0, 100.0, 101.5)],
        );
        assert!(!series.is_consistent());
    }

    #[test]
    fn empty_series_has_no_latest() {
        let series = Series::new("ripple", Utc::now(), Vec::new());
        assert!(series.is_empty());
        assert!(series.latest().is_none());
        assert!(series.is_consistent());
    }
}
