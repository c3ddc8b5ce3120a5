// =============================================================================
// Synthetic OHLCV — Main Entry Point
// =============================================================================
//
// Warms the series cache, starts the background producer and runs a headless
// consumer that reads one instrument on a fixed interval and logs its latest
// bar. Ctrl+C stops the producer and exits.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use synth_ohlcv::{RuntimeConfig, SeriesCache, SystemClock};

const DEFAULT_CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("SYNTH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(ms) = std::env::var("SYNTH_REFRESH_MS") {
        match ms.trim().parse::<u64>() {
            Ok(v) => config.refresh_interval_ms = v,
            Err(e) => warn!(value = %ms, error = %e, "Ignoring invalid SYNTH_REFRESH_MS"),
        }
    }
    if let Ok(inst) = std::env::var("SYNTH_INSTRUMENT") {
        let inst = inst.trim().to_lowercase();
        if !inst.is_empty() {
            config.consumer.instrument = inst;
        }
    }

    // ── 2. Cache (eager warm-up) & producer ──────────────────────────────
    let cache = Arc::new(config.build_cache(Arc::new(SystemClock))?);
    info!(
        instruments = ?cache.list_instruments(),
        refresh_ms = config.refresh_interval_ms,
        "Series cache ready"
    );
    cache.start();

    // ── 3. Headless consumer ─────────────────────────────────────────────
    let consumer_cache = cache.clone();
    let selected = config.consumer.instrument.clone();
    let poll = config.poll_interval();
    let consumer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll);
        loop {
            interval.tick().await;
            report_latest(&consumer_cache, &selected);
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    consumer.abort();
    cache.stop().await;

    info!(cycles = cache.cycles_completed(), "Shut down complete.");
    Ok(())
}

/// Log a one-line summary of the latest bar of `id`.
fn report_latest(cache: &SeriesCache, id: &str) {
    let label = cache.registry().display_name(id);
    let Some(series) = cache.get(id) else {
        warn!(instrument = %id, "No data for instrument");
        return;
    };
    let Some(bar) = series.latest() else {
        warn!(instrument = %id, "Series is empty");
        return;
    };
    info!(
        instrument = %label,
        bars = series.len(),
        at = %bar.timestamp,
        open = bar.open,
        high = bar.high,
        low = bar.low,
        close = bar.close,
        volume = bar.volume,
        "latest bar"
    );
}
