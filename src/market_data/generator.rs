// =============================================================================
// Bar Series Generator — random-walk OHLCV synthesis
// =============================================================================
//
// Produces an hourly OHLCV series over a trailing window:
//
//   drift_i = sum_{k<=i} N(0, drift_fraction * base)
//   open_i  = base + drift_i
//   high_i  = open_i * (1 + U[0, wick_fraction])
//   low_i   = open_i * (1 - U[0, wick_fraction])
//   close_i = U[low_i, high_i]
//   vol_i   = U[volume_min_multiple * base, volume_max_multiple * base]
//
// Bars are independent of each other apart from the shared drift; the open of
// bar i is NOT the close of bar i-1.
//
// Each call builds its own RNG from the configured `SeedStrategy`, so the
// generator holds no mutable state and can be shared freely across threads.
// =============================================================================

use chrono::{DateTime, Duration, DurationRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::GenerateError;
use crate::instruments::Instrument;
use crate::types::{Bar, Series};

/// Default trailing window, in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Longest lookback window accepted, in days.
pub const MAX_WINDOW_DAYS: i64 = 3_650;

/// Lowest open the walk may reach, as a fraction of the base price. Keeps
/// prices positive when the drift wanders far below zero.
const MIN_OPEN_FRACTION: f64 = 0.01;

// =============================================================================
// Seed strategy
// =============================================================================

/// How each generation call seeds its RNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeedStrategy {
    /// Fresh OS entropy on every call.
    Entropy,
    /// Seed with `unix_seconds(now) % modulus`. Calls whose `now` lands on
    /// the same residue produce identical draws; `modulus = 100` replays
    /// every 100 seconds.
    WallClockModulo { modulus: u64 },
    /// The same seed on every call.
    Fixed { seed: u64 },
}

impl Default for SeedStrategy {
    fn default() -> Self {
        Self::Entropy
    }
}

impl SeedStrategy {
    /// Build the RNG for a generation call at `now`.
    pub fn rng(&self, now: DateTime<Utc>) -> StdRng {
        match *self {
            Self::Entropy => StdRng::from_entropy(),
            Self::WallClockModulo { modulus } => {
                let secs = now.timestamp().rem_euclid(i64::MAX) as u64;
                StdRng::seed_from_u64(secs % modulus.max(1))
            }
            Self::Fixed { seed } => StdRng::seed_from_u64(seed),
        }
    }

    fn validate(&self) -> Result<(), GenerateError> {
        match self {
            Self::WallClockModulo { modulus: 0 } => Err(GenerateError::InvalidParams(
                "wall_clock_modulo modulus must be at least 1".into(),
            )),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Generator parameters
// =============================================================================

fn default_drift_fraction() -> f64 {
    0.01
}

fn default_wick_fraction() -> f64 {
    0.02
}

fn default_volume_min_multiple() -> f64 {
    1_000.0
}

fn default_volume_max_multiple() -> f64 {
    5_000.0
}

/// Shape parameters of the random walk. All are fractions or multiples of
/// the instrument's base price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorParams {
    /// Standard deviation of each drift step.
    #[serde(default = "default_drift_fraction")]
    pub drift_fraction: f64,

    /// Upper bound of the high/low wick around the open.
    #[serde(default = "default_wick_fraction")]
    pub wick_fraction: f64,

    #[serde(default = "default_volume_min_multiple")]
    pub volume_min_multiple: f64,

    #[serde(default = "default_volume_max_multiple")]
    pub volume_max_multiple: f64,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            drift_fraction: default_drift_fraction(),
            wick_fraction: default_wick_fraction(),
            volume_min_multiple: default_volume_min_multiple(),
            volume_max_multiple: default_volume_max_multiple(),
        }
    }
}

impl GeneratorParams {
    pub fn validate(&self) -> Result<(), GenerateError> {
        if !self.drift_fraction.is_finite() || self.drift_fraction < 0.0 {
            return Err(GenerateError::InvalidParams(format!(
                "drift_fraction must be finite and >= 0, got {}",
                self.drift_fraction
            )));
        }
        // A wick of 1.0 or more would allow a zero or negative low.
        if !self.wick_fraction.is_finite() || !(0.0..1.0).contains(&self.wick_fraction) {
            return Err(GenerateError::InvalidParams(format!(
                "wick_fraction must be in [0, 1), got {}",
                self.wick_fraction
            )));
        }
        if !self.volume_min_multiple.is_finite()
            || !self.volume_max_multiple.is_finite()
            || self.volume_min_multiple <= 0.0
            || self.volume_min_multiple > self.volume_max_multiple
        {
            return Err(GenerateError::InvalidParams(format!(
                "volume range must satisfy 0 < min <= max, got [{}, {}]",
                self.volume_min_multiple, self.volume_max_multiple
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Time grid
// =============================================================================

/// Hourly timestamps covering `[now - window_days, now]`, both ends aligned
/// down to the hour. Always `window_days * 24 + 1` points.
///
/// `window_days` must lie in `1..=MAX_WINDOW_DAYS`.
pub fn hourly_grid(window_days: i64, now: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>, GenerateError> {
    if !(1..=MAX_WINDOW_DAYS).contains(&window_days) {
        return Err(GenerateError::InvalidWindow(window_days));
    }

    let end = now
        .duration_trunc(Duration::hours(1))
        .map_err(|e| GenerateError::InvalidParams(format!("cannot align {now} to the hour: {e}")))?;
    let hours = window_days
        .checked_mul(24)
        .ok_or(GenerateError::InvalidWindow(window_days))?;
    let start = Duration::try_hours(hours)
        .and_then(|span| end.checked_sub_signed(span))
        .ok_or(GenerateError::InvalidWindow(window_days))?;

    Ok((0..=hours).map(|h| start + Duration::hours(h)).collect())
}

// =============================================================================
// Generator
// =============================================================================

/// Anything that can produce a full series for an instrument. The refresh
/// cache is generic over this so alternative sources can be plugged in.
pub trait SeriesSource: Send + Sync {
    fn generate_series(
        &self,
        instrument: &Instrument,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Series, GenerateError>;
}

/// Stateless random-walk bar generator.
#[derive(Debug, Clone, Default)]
pub struct BarGenerator {
    params: GeneratorParams,
    seed: SeedStrategy,
}

impl BarGenerator {
    pub fn new(params: GeneratorParams, seed: SeedStrategy) -> Result<Self, GenerateError> {
        params.validate()?;
        seed.validate()?;
        Ok(Self { params, seed })
    }

    pub fn params(&self) -> &GeneratorParams {
        &self.params
    }

    pub fn seed_strategy(&self) -> SeedStrategy {
        self.seed
    }

    /// Generate bars with an RNG built from the configured seed strategy.
    pub fn generate(
        &self,
        base_price: f64,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Bar>, GenerateError> {
        let mut rng = self.seed.rng(now);
        self.generate_with_rng(base_price, window_days, now, &mut rng)
    }

    /// Generate bars drawing from a caller-supplied RNG.
    pub fn generate_with_rng<R: Rng + ?Sized>(
        &self,
        base_price: f64,
        window_days: i64,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<Bar>, GenerateError> {
        if !base_price.is_finite() || base_price <= 0.0 {
            return Err(GenerateError::InvalidBasePrice(base_price));
        }
        let grid = hourly_grid(window_days, now)?;

        let step_std = self.params.drift_fraction * base_price;
        let vol_lo = self.params.volume_min_multiple * base_price;
        let vol_hi = self.params.volume_max_multiple * base_price;
        // Huge base prices overflow the derived ranges to infinity.
        if !step_std.is_finite() || !vol_hi.is_finite() {
            return Err(GenerateError::InvalidBasePrice(base_price));
        }

        let step = Normal::new(0.0, step_std)
            .map_err(|e| GenerateError::InvalidParams(format!("drift distribution: {e}")))?;

        // All drift steps are drawn up front, then the per-bar draws follow.
        let mut drift = Vec::with_capacity(grid.len());
        let mut acc = 0.0;
        for _ in 0..grid.len() {
            acc += step.sample(rng);
            drift.push(acc);
        }

        let wick = self.params.wick_fraction;
        let min_open = base_price * MIN_OPEN_FRACTION;

        let mut bars = Vec::with_capacity(grid.len());
        for (timestamp, d) in grid.into_iter().zip(drift) {
            let open = (base_price + d).max(min_open);
            let high = open * (1.0 + rng.gen_range(0.0..=wick));
            let low = open * (1.0 - rng.gen_range(0.0..=wick));
            if !high.is_finite() || !low.is_finite() {
                return Err(GenerateError::InvalidBasePrice(base_price));
            }
            let close = rng.gen_range(low..=high);
            let volume = rng.gen_range(vol_lo..=vol_hi);
            bars.push(Bar {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });
        }

        Ok(bars)
    }
}

impl SeriesSource for BarGenerator {
    fn generate_series(
        &self,
        instrument: &Instrument,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Series, GenerateError> {
        let bars = self.generate(instrument.base_price, window_days, now)?;
        Ok(Series::new(instrument.id.clone(), now, bars))
    }
}

/// Generate a series with default parameters and entropy seeding.
pub fn generate(base_price: f64, window_days: i64, now: DateTime<Utc>) -> Result<Vec<Bar>, GenerateError> {
    BarGenerator::default().generate(base_price, window_days, now)
}

// =============================================================================
// Tests
// =============================================================================
