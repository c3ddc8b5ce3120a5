// =============================================================================
// Series Cache — eagerly warmed, periodically refreshed bar series per instrument
// =============================================================================
//
// One producer task regenerates every instrument's series on a fixed period and
// swaps each entry in as a whole `Arc<Series>`. Readers clone the `Arc` under a
// short read lock, so a reader holds either the previous or the new series,
// never a partially written one.
//
// Lifecycle:
//   let cache = Arc::new(SeriesCache::new(...)?);   // warm-up, every entry filled
//   cache.start();                                  // spawn producer
//   cache.get("bitcoin");                           // any number of readers
//   cache.stop().await;                             // join producer
//
// A failure generating one instrument is logged and counted; that instrument
// keeps its previous series and the cycle carries on with the rest.
// =============================================================================

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::GenerateError;
use crate::instruments::{Instrument, InstrumentRegistry};
use crate::market_data::clock::Clock;
use crate::market_data::generator::SeriesSource;
use crate::types::Series;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

struct Entry {
    series: Arc<Series>,
    refreshed_at: DateTime<Utc>,
}

/// Outcome of one refresh cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// The `now` every instrument in this cycle was generated with.
    pub started_at: DateTime<Utc>,
    /// Number of instruments whose entry was replaced.
    pub refreshed: usize,
    /// Instruments that kept their previous series.
    pub failed: Vec<String>,
}

struct ProducerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// SeriesCache
// ---------------------------------------------------------------------------

/// Keyed store of the latest generated series for every registered
/// instrument.
pub struct SeriesCache {
    registry: Arc<InstrumentRegistry>,
    source: Arc<dyn SeriesSource>,
    clock: Arc<dyn Clock>,
    window_days: i64,
    refresh_interval: Duration,

    entries: RwLock<HashMap<String, Entry>>,
    failures: HashMap<String, AtomicU64>,

    cycles: AtomicU64,
    cycle_tx: watch::Sender<u64>,

    producer: Mutex<Option<ProducerTask>>,
}

impl SeriesCache {
    /// Build the cache and generate a series for every instrument before
    /// returning. Fails if any instrument cannot be generated.
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        source: Arc<dyn SeriesSource>,
        clock: Arc<dyn Clock>,
        window_days: i64,
        refresh_interval: Duration,
    ) -> Result<Self, GenerateError> {
        let now = clock.now();
        let mut entries = HashMap::with_capacity(registry.len());
        for inst in registry.iter() {
            let series = source.generate_series(inst, window_days, now)?;
            entries.insert(
                inst.id.clone(),
                Entry {
                    series: Arc::new(series),
                    refreshed_at: now,
                },
            );
        }

        let failures = registry
            .iter()
            .map(|inst| (inst.id.clone(), AtomicU64::new(0)))
            .collect();

        info!(
            instruments = registry.len(),
            window_days,
            refresh_ms = refresh_interval.as_millis() as u64,
            "series cache warmed up"
        );

        let (cycle_tx, _) = watch::channel(0);

        Ok(Self {
            registry,
            source,
            clock,
            window_days,
            refresh_interval,
            entries: RwLock::new(entries),
            failures,
            cycles: AtomicU64::new(0),
            cycle_tx,
            producer: Mutex::new(None),
        })
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Registered instrument ids, in configuration order.
    pub fn list_instruments(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn registry(&self) -> &InstrumentRegistry {
        &self.registry
    }

    /// Latest series for `id`, or `None` for an unknown instrument.
    /// Never generates.
    pub fn get(&self, id: &str) -> Option<Arc<Series>> {
        self.entries.read().get(id).map(|e| Arc::clone(&e.series))
    }

    /// The `now` of the last successful refresh of `id`.
    pub fn last_refreshed(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.read().get(id).map(|e| e.refreshed_at)
    }

    /// Total generation failures recorded for `id` since construction.
    pub fn failures(&self, id: &str) -> u64 {
        self.failures
            .get(id)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Number of refresh cycles completed since construction (warm-up
    /// excluded).
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Receiver that observes the completed-cycle count after every cycle.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.cycle_tx.subscribe()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn window_days(&self) -> i64 {
        self.window_days
    }

    // ── Refresh ─────────────────────────────────────────────────────────

    /// Regenerate every instrument once, replacing each entry as it
    /// completes.
    pub fn refresh_all(&self) -> CycleReport {
        let started_at = self.clock.now();
        let mut refreshed = 0;
        let mut failed = Vec::new();

        for inst in self.registry.iter() {
            match self.generate_one(inst, started_at) {
                Ok(series) => {
                    let entry = Entry {
                        series: Arc::new(series),
                        refreshed_at: started_at,
                    };
                    self.entries.write().insert(inst.id.clone(), entry);
                    refreshed += 1;
                }
                Err(reason) => {
                    if let Some(counter) = self.failures.get(&inst.id) {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(
                        instrument = %inst.id,
                        error = %reason,
                        "series generation failed, keeping previous series"
                    );
                    failed.push(inst.id.clone());
                }
            }
        }

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        self.cycle_tx.send_replace(cycle);

        debug!(
            cycle,
            refreshed,
            failed = failed.len(),
            now = %started_at,
            "refresh cycle complete"
        );

        CycleReport {
            started_at,
            refreshed,
            failed,
        }
    }

    fn generate_one(&self, inst: &Instrument, now: DateTime<Utc>) -> Result<Series, String> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.source.generate_series(inst, self.window_days, now)
        }));
        match outcome {
            Ok(Ok(series)) => Ok(series),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("generator panicked".to_string()),
        }
    }

    // ── Producer lifecycle ──────────────────────────────────────────────

    /// Spawn the producer task on the current Tokio runtime. Returns `false`
    /// if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.producer.lock();
        if slot.as_ref().is_some_and(|p| !p.handle.is_finished()) {
            warn!("series producer already running");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_producer(
            Arc::downgrade(self),
            self.refresh_interval,
            shutdown_rx,
        ));
        *slot = Some(ProducerTask { shutdown, handle });
        true
    }

    pub fn is_running(&self) -> bool {
        self.producer
            .lock()
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Signal the producer to stop and wait for it. Returns `false` if it was
    /// not running.
    pub async fn stop(&self) -> bool {
        let task = self.producer.lock().take();
        let Some(task) = task else {
            return false;
        };

        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            error!(error = %e, "series producer ended abnormally");
        }
        true
    }
}

/// Producer loop. Holds only a weak reference so a dropped cache ends it.
async fn run_producer(
    cache: Weak<SeriesCache>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(period_ms = period.as_millis() as u64, "series producer started");

    // The warm-up already filled every entry, so the first cycle waits a full
    // period.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.refresh_all();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("series producer stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use chrono::TimeZone;

    use crate::market_data::clock::{FixedClock, SystemClock};
    use crate::market_data::generator::{BarGenerator, GeneratorParams, SeedStrategy};

    fn aligned_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    fn generator() -> Arc<BarGenerator> {
        Arc::new(BarGenerator::new(GeneratorParams::default(), SeedStrategy::Entropy).unwrap())
    }

    fn cache_with(
        source: Arc<dyn SeriesSource>,
        clock: Arc<dyn Clock>,
        refresh: Duration,
    ) -> SeriesCache {
        SeriesCache::new(
            Arc::new(InstrumentRegistry::default()),
            source,
            clock,
            7,
            refresh,
        )
        .expect("warm-up")
    }

    /// Fails for one instrument while `failing` is set; panics for it while
    /// `panicking` is set.
    struct FlakySource {
        inner: BarGenerator,
        target: &'static str,
        failing: AtomicBool,
        panicking: AtomicBool,
    }

    impl FlakySource {
        fn new(target: &'static str) -> Self {
            Self {
                inner: BarGenerator::default(),
                target,
                failing: AtomicBool::new(false),
                panicking: AtomicBool::new(false),
            }
        }
    }

    impl SeriesSource for FlakySource {
        fn generate_series(
            &self,
            instrument: &Instrument,
            window_days: i64,
            now: DateTime<Utc>,
        ) -> Result<Series, GenerateError> {
            if instrument.id == self.target {
                if self.panicking.load(Ordering::SeqCst) {
                    panic!("simulated generator panic");
                }
                if self.failing.load(Ordering::SeqCst) {
                    return Err(GenerateError::InvalidParams("simulated failure".into()));
                }
            }
            self.inner.generate_series(instrument, window_days, now)
        }
    }

    struct AlwaysFails;

    impl SeriesSource for AlwaysFails {
        fn generate_series(
            &self,
            instrument: &Instrument,
            _window_days: i64,
            _now: DateTime<Utc>,
        ) -> Result<Series, GenerateError> {
            Err(GenerateError::InvalidParams(format!("no series for {}", instrument.id)))
        }
    }

    // ---- warm-up & reads ---------------------------------------------------

    #[test]
    fn warm_up_fills_every_instrument() {
        let cache = cache_with(
            generator(),
            Arc::new(FixedClock::new(aligned_now())),
            Duration::from_secs(5),
        );
        for id in cache.list_instruments() {
            let series = cache.get(&id).expect("warmed entry");
            assert_eq!(series.instrument, id);
            assert_eq!(series.len(), 169);
            assert!(series.is_consistent());
            assert_eq!(cache.last_refreshed(&id), Some(aligned_now()));
        }
        assert_eq!(cache.cycles_completed(), 0);
    }

    #[test]
    fn unknown_instrument_is_a_lookup_miss() {
        let cache = cache_with(generator(), Arc::new(SystemClock), Duration::from_secs(5));
        assert!(cache.get("nonexistent").is_none());
        assert!(cache.last_refreshed("nonexistent").is_none());
        assert_eq!(cache.failures("nonexistent"), 0);
    }

    #[test]
    fn warm_up_failure_is_reported() {
        let result = SeriesCache::new(
            Arc::new(InstrumentRegistry::default()),
            Arc::new(AlwaysFails),
            Arc::new(SystemClock),
            7,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(GenerateError::InvalidParams(_))));
    }

    // ---- refresh -----------------------------------------------------------

    #[test]
    fn refresh_replaces_whole_series() {
        let clock = Arc::new(FixedClock::new(aligned_now()));
        let cache = cache_with(generator(), clock.clone(), Duration::from_secs(5));
        let before = cache.get("bitcoin").unwrap();

        clock.advance(chrono::Duration::hours(1));
        let report = cache.refresh_all();
        assert_eq!(report.refreshed, 5);
        assert!(report.failed.is_empty());
        assert_eq!(cache.cycles_completed(), 1);

        let after = cache.get("bitcoin").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        // The old snapshot is untouched.
        assert_eq!(before.last_timestamp(), Some(aligned_now()));
        assert_eq!(after.len(), before.len());
    }

    #[test]
    fn read_after_write_tracks_cycle_time() {
        let clock = Arc::new(FixedClock::new(aligned_now()));
        let cache = cache_with(generator(), clock.clone(), Duration::from_secs(5));

        let later = aligned_now() + chrono::Duration::hours(3);
        clock.set(later);
        let report = cache.refresh_all();
        assert_eq!(report.started_at, later);

        let series = cache.get("ethereum").unwrap();
        assert_eq!(series.generated_at, later);
        // The clock is hour-aligned, so the last bar sits exactly on it.
        assert_eq!(series.last_timestamp(), Some(later));
        assert_eq!(cache.last_refreshed("ethereum"), Some(later));
    }

    #[test]
    fn failing_instrument_keeps_stale_series() {
        let source = Arc::new(FlakySource::new("ripple"));
        let cache = cache_with(
            source.clone(),
            Arc::new(FixedClock::new(aligned_now())),
            Duration::from_secs(5),
        );
        let stale = cache.get("ripple").unwrap();
        let old_btc = cache.get("bitcoin").unwrap();

        source.failing.store(true, Ordering::SeqCst);
        let report = cache.refresh_all();
        assert_eq!(report.refreshed, 4);
        assert_eq!(report.failed, vec!["ripple".to_string()]);
        assert!(Arc::ptr_eq(&stale, &cache.get("ripple").unwrap()));
        assert!(!Arc::ptr_eq(&old_btc, &cache.get("bitcoin").unwrap()));
        assert_eq!(cache.failures("ripple"), 1);
        assert_eq!(cache.failures("bitcoin"), 0);

        // Self-heals on the next good cycle.
        source.failing.store(false, Ordering::SeqCst);
        let report = cache.refresh_all();
        assert!(report.failed.is_empty());
        assert!(!Arc::ptr_eq(&stale, &cache.get("ripple").unwrap()));
        assert_eq!(cache.failures("ripple"), 1);
    }

    #[test]
    fn panicking_generator_does_not_abort_cycle() {
        let source = Arc::new(FlakySource::new("cardano"));
        let cache = cache_with(
            source.clone(),
            Arc::new(FixedClock::new(aligned_now())),
            Duration::from_secs(5),
        );
        source.panicking.store(true, Ordering::SeqCst);
        let report = cache.refresh_all();
        assert_eq!(report.failed, vec!["cardano".to_string()]);
        assert_eq!(report.refreshed, 4);
        assert!(cache.get("cardano").is_some());
    }

    // ---- producer ----------------------------------------------------------

    #[tokio::test]
    async fn producer_runs_cycles_until_stopped() {
        let cache = Arc::new(cache_with(
            generator(),
            Arc::new(SystemClock),
            Duration::from_millis(10),
        ));
        let mut cycles = cache.subscribe();

        assert!(cache.start());
        assert!(!cache.start(), "second start is rejected");
        assert!(cache.is_running());

        tokio::time::timeout(Duration::from_secs(5), async {
            while *cycles.borrow_and_update() < 3 {
                cycles.changed().await.expect("cache alive");
            }
        })
        .await
        .expect("three cycles within timeout");

        assert!(cache.stop().await);
        assert!(!cache.is_running());
        assert!(!cache.stop().await);

        let after_stop = cache.cycles_completed();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.cycles_completed(), after_stop);
    }

    #[tokio::test]
    async fn producer_can_restart_after_stop() {
        let cache = Arc::new(cache_with(
            generator(),
            Arc::new(SystemClock),
            Duration::from_millis(10),
        ));
        assert!(cache.start());
        assert!(cache.stop().await);
        assert!(cache.start());
        assert!(cache.stop().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_never_see_torn_series() {
        let cache = Arc::new(cache_with(
            generator(),
            Arc::new(SystemClock),
            Duration::from_millis(10),
        ));
        let expected_len = cache.get("bitcoin").unwrap().len();
        cache.start();

        let mut readers = tokio::task::JoinSet::new();
        for _ in 0..1000 {
            let cache = Arc::clone(&cache);
            readers.spawn(async move {
                let mut reads = 0u64;
                loop {
                    let series = cache.get("bitcoin").expect("registered instrument");
                    assert_eq!(series.len(), expected_len);
                    assert!(series.is_consistent());
                    reads += 1;
                    if cache.cycles_completed() >= 3 {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                reads
            });
        }

        let total = tokio::time::timeout(Duration::from_secs(30), async {
            let mut total = 0;
            while let Some(res) = readers.join_next().await {
                total += res.expect("reader task");
            }
            total
        })
        .await
        .expect("readers finished");

        assert!(total >= 1000);
        assert!(cache.cycles_completed() >= 3);
        cache.stop().await;
    }

    #[tokio::test]
    async fn dropped_cache_ends_producer() {
        let cache = Arc::new(cache_with(
            generator(),
            Arc::new(SystemClock),
            Duration::from_millis(5),
        ));
        cache.start();
        let handle = cache.producer.lock().take().map(|p| (p.shutdown, p.handle));
        drop(cache);

        let (_shutdown, handle) = handle.expect("producer spawned");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("producer exits once cache is gone")
            .expect("producer joined");
    }
}
