// =============================================================================
// Synthetic OHLCV market data
// =============================================================================
//
// A random-walk bar generator and a background-refreshed cache that serves the
// latest series per instrument to any number of concurrent readers.
// =============================================================================

pub mod error;
pub mod instruments;
pub mod market_data;
pub mod runtime_config;
pub mod types;

pub use error::GenerateError;
pub use instruments::{Instrument, InstrumentRegistry};
pub use market_data::{
    BarGenerator, Clock, CycleReport, FixedClock, GeneratorParams, SeedStrategy, SeriesCache,
    SeriesSource, SystemClock,
};
pub use runtime_config::RuntimeConfig;
pub use types::{Bar, Series};
