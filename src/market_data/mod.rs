pub mod clock;
pub mod generator;
pub mod series_cache;

// Re-exports for convenient access (e.g. `use crate::market_data::SeriesCache`).
pub use clock::{Clock, FixedClock, SystemClock};
pub use generator::{BarGenerator, GeneratorParams, SeedStrategy, SeriesSource};
pub use series_cache::{CycleReport, SeriesCache};
