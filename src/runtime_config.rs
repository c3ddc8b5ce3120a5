// =============================================================================
// Runtime Configuration — generator, registry and refresh settings
// =============================================================================
//
// Every tunable parameter of the synthetic market lives here: the instrument
// table, the lookback window, the refresh period, the seeding strategy and the
// random-walk shape.
//
// Missing fields fall back to their defaults; saves go through a tmp file.
//
// =============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::instruments::{default_instruments, Instrument, InstrumentRegistry};
use crate::market_data::generator::MAX_WINDOW_DAYS;
use crate::market_data::{BarGenerator, Clock, GeneratorParams, SeedStrategy, SeriesCache};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_window_days() -> i64 {
    crate::market_data::generator::DEFAULT_WINDOW_DAYS
}

fn default_refresh_interval_ms() -> u64 {
    5_000
}

fn default_consumer_instrument() -> String {
    "bitcoin".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

// =============================================================================
// ConsumerConfig
// =============================================================================

/// Settings for the headless consumer in the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Instrument the consumer reads on every poll.
    #[serde(default = "default_consumer_instrument")]
    pub instrument: String,

    /// How often the consumer reads the cache.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            instrument: default_consumer_instrument(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Instrument table, in display order.
    #[serde(default = "default_instruments")]
    pub instruments: Vec<Instrument>,

    /// Lookback window of every generated series.
    #[serde(default = "default_window_days")]
    pub window_days: i64,

    /// Period of the background refresh loop.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    #[serde(default)]
    pub seed_strategy: SeedStrategy,

    /// Random-walk shape parameters.
    #[serde(default)]
    pub generator: GeneratorParams,

    #[serde(default)]
    pub consumer: ConsumerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            instruments: default_instruments(),
            window_days: default_window_days(),
            refresh_interval_ms: default_refresh_interval_ms(),
            seed_strategy: SeedStrategy::default(),
            generator: GeneratorParams::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            instruments = config.instruments.len(),
            refresh_ms = config.refresh_interval_ms,
            seed = ?config.seed_strategy,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Reject settings the generator or producer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_WINDOW_DAYS).contains(&self.window_days) {
            bail!(
                "window_days must be in 1..={MAX_WINDOW_DAYS}, got {}",
                self.window_days
            );
        }
        if self.refresh_interval_ms == 0 {
            bail!("refresh_interval_ms must be positive");
        }
        if self.consumer.poll_interval_ms == 0 {
            bail!("consumer.poll_interval_ms must be positive");
        }
        self.generator
            .validate()
            .context("invalid generator parameters")?;
        // Registry construction checks ids and base prices.
        InstrumentRegistry::new(self.instruments.clone())?;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.consumer.poll_interval_ms)
    }

    pub fn registry(&self) -> Result<InstrumentRegistry> {
        InstrumentRegistry::new(self.instruments.clone())
    }

    pub fn bar_generator(&self) -> Result<BarGenerator> {
        BarGenerator::new(self.generator.clone(), self.seed_strategy)
            .context("failed to build bar generator")
    }

    /// Validate, then build a warmed cache driven by `clock`.
    pub fn build_cache(&self, clock: Arc<dyn Clock>) -> Result<SeriesCache> {
        self.validate()?;
        let cache = SeriesCache::new(
            Arc::new(self.registry()?),
            Arc::new(self.bar_generator()?),
            clock,
            self.window_days,
            self.refresh_interval(),
        )
        .context("series cache warm-up failed")?;
        Ok(cache)
    }
}
