// Exchange-rate cache: serves the last-known table immediately and revalidates in the background.
// Lookups never fail and never wait on the network.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{duration_to_millis, Clock};
use crate::config::RateCacheConfig;
use crate::provider::{FetchError, RateProvider};
use crate::storage::{KvStore, Snapshot};

#[derive(Error, Debug, PartialEq)]
pub enum RateTableError {
    #[error("Base currency {base} has rate {rate}, expected 1.0")]
    InconsistentBase { base: String, rate: f64 },

    #[error("No usable rates besides the base currency")]
    NoUsableRates,
}

/// Rates relative to a base currency. The base is always present at 1.0 and every rate is positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateTable {
    base: String,
    rates: HashMap<String, f64>,
    fetched_at: i64,
}

impl RateTable {
    // Used when nothing has ever been fetched so conversion is never undefined
    pub fn bootstrap(base: &str) -> Self {
        let base = normalize_code(base);
        let mut rates = HashMap::new();
        rates.insert(base.clone(), 1.0);
        Self {
            base,
            rates,
            fetched_at: 0,
        }
    }

    /// Builds a table from raw provider data, dropping entries that would break the invariants.
    pub fn from_rates(
        base: &str,
        raw: HashMap<String, f64>,
        fetched_at: i64,
    ) -> Result<Self, RateTableError> {
        let base = normalize_code(base);
        let mut rates = HashMap::with_capacity(raw.len() + 1);

        for (code, rate) in raw {
            let code = normalize_code(&code);
            if code.is_empty() || !rate.is_finite() || rate <= 0.0 {
                warn!(currency = %code, rate, "dropping unusable exchange rate");
                continue;
            }
            rates.insert(code, rate);
        }

        match rates.get(&base) {
            Some(rate) if (rate - 1.0).abs() > 1e-9 => {
                return Err(RateTableError::InconsistentBase { base, rate: *rate });
            }
            _ => {}
        }
        rates.insert(base.clone(), 1.0);

        if rates.len() < 2 {
            return Err(RateTableError::NoUsableRates);
        }

        Ok(Self {
            base,
            rates,
            fetched_at,
        })
    }

    pub fn rate(&self, code: &str) -> Option<f64> {
        self.rates.get(code).copied()
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn fetched_at(&self) -> i64 {
        self.fetched_at
    }

    pub fn rates(&self) -> &HashMap<String, f64> {
        &self.rates
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn is_bootstrap(&self) -> bool {
        self.fetched_at == 0 && self.rates.len() == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    Warm,
    Stale,
}

// A rate table plus the window during which it counts as warm
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRateTable {
    pub table: RateTable,
    pub freshness_window: Duration,
}

impl CachedRateTable {
    pub fn freshness_at(&self, now_ms: i64) -> Freshness {
        let age_ms = now_ms.saturating_sub(self.table.fetched_at);
        if age_ms < duration_to_millis(self.freshness_window) {
            Freshness::Warm
        } else {
            Freshness::Stale
        }
    }
}

// Stats for the rate cache
#[derive(Debug, Default)]
pub struct RateCacheStats {
    pub lookups: AtomicUsize,
    pub unknown_currency_count: AtomicUsize,
    pub refresh_attempts: AtomicUsize,
    pub refresh_successes: AtomicUsize,
    pub refresh_failures: AtomicUsize,
    pub refresh_skipped: AtomicUsize,
    pub corrupt_snapshots: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RateCacheStatsReport {
    pub lookups: usize,
    pub unknown_currency_count: usize,
    pub refresh_attempts: usize,
    pub refresh_successes: usize,
    pub refresh_failures: usize,
    pub refresh_skipped: usize,
    pub corrupt_snapshots: usize,
}

/// Cheaply cloneable handle; clones share the same table.
#[derive(Clone)]
pub struct RateCache {
    inner: Arc<RateCacheInner>,
}

struct RateCacheInner {
    base: String,
    snapshot_key: String,
    retry_cooldown_ms: i64,
    cached: RwLock<CachedRateTable>,
    store: Arc<dyn KvStore>,
    provider: Arc<dyn RateProvider>,
    clock: Arc<dyn Clock>,
    refresh_in_flight: AtomicBool,
    last_refresh_attempt_ms: AtomicI64,
    stats: RateCacheStats,
}

// Clears the in-flight flag when the refresh task finishes, panics, or is dropped unpolled
struct InFlightGuard(Arc<RateCacheInner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.refresh_in_flight.store(false, Ordering::SeqCst);
    }
}

impl RateCache {
    pub fn new(
        config: &RateCacheConfig,
        store: Arc<dyn KvStore>,
        provider: Arc<dyn RateProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let base = normalize_code(&config.base_currency);
        Self {
            inner: Arc::new(RateCacheInner {
                cached: RwLock::new(CachedRateTable {
                    table: RateTable::bootstrap(&base),
                    freshness_window: config.freshness_window(),
                }),
                base,
                snapshot_key: config.snapshot_key(),
                retry_cooldown_ms: duration_to_millis(config.retry_cooldown()),
                store,
                provider,
                clock,
                refresh_in_flight: AtomicBool::new(false),
                last_refresh_attempt_ms: AtomicI64::new(i64::MIN),
                stats: RateCacheStats::default(),
            }),
        }
    }

    /// Replaces the in-memory table with the persisted snapshot, or the bootstrap table.
    pub fn load(&self) -> Freshness {
        let inner = &self.inner;
        let key = inner.snapshot_key.as_str();

        let table = match inner.store.get(key) {
            None => {
                debug!(key, "no rate snapshot, starting from bootstrap table");
                RateTable::bootstrap(&inner.base)
            }
            Some(raw) => match self.parse_snapshot(&raw) {
                Ok(table) => table,
                Err(reason) => {
                    warn!(key, %reason, "discarding corrupt rate snapshot");
                    inner.stats.corrupt_snapshots.fetch_add(1, Ordering::SeqCst);
                    if let Err(e) = inner.store.delete(key) {
                        warn!(key, error = %e, "failed to delete corrupt rate snapshot");
                    }
                    RateTable::bootstrap(&inner.base)
                }
            },
        };

        let currencies = table.len();
        let freshness = {
            let mut cached = inner.cached.write();
            cached.table = table;
            cached.freshness_at(inner.clock.now_millis())
        };
        info!(key, currencies, ?freshness, "rate table loaded");
        freshness
    }

    fn parse_snapshot(&self, raw: &str) -> Result<RateTable, String> {
        let snapshot: Snapshot<HashMap<String, f64>> =
            serde_json::from_str(raw).map_err(|e| e.to_string())?;
        RateTable::from_rates(&self.inner.base, snapshot.data, snapshot.timestamp)
            .map_err(|e| e.to_string())
    }

    /// Fetches fresh rates. Failures keep the previous table and are only logged.
    /// Returns whether the table was replaced.
    pub async fn refresh(&self) -> bool {
        let inner = &self.inner;
        inner.stats.refresh_attempts.fetch_add(1, Ordering::SeqCst);
        inner
            .last_refresh_attempt_ms
            .store(inner.clock.now_millis(), Ordering::SeqCst);

        let fetched = inner.provider.fetch_rates(&inner.base).await;
        let table = fetched.and_then(|rates| {
            RateTable::from_rates(&inner.base, rates, inner.clock.now_millis())
                .map_err(|e| FetchError::Malformed(e.to_string()))
        });

        let table = match table {
            Ok(table) => table,
            Err(e) => {
                inner.stats.refresh_failures.fetch_add(1, Ordering::SeqCst);
                warn!(base = %inner.base, error = %e, "rate refresh failed, keeping last-known table");
                return false;
            }
        };

        self.persist(&table);
        let currencies = table.len();
        inner.cached.write().table = table;
        inner.stats.refresh_successes.fetch_add(1, Ordering::SeqCst);
        info!(base = %inner.base, currencies, "exchange rates refreshed");
        true
    }

    // A failed write only costs us the snapshot; the fresh table is still served
    fn persist(&self, table: &RateTable) {
        let key = self.inner.snapshot_key.as_str();
        let snapshot = Snapshot {
            data: table.rates(),
            timestamp: table.fetched_at(),
        };
        let result = serde_json::to_string(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|json| self.inner.store.set(key, json).map_err(|e| e.to_string()));
        if let Err(reason) = result {
            warn!(key, %reason, "failed to persist rate snapshot");
        }
    }

    /// Fire-and-forget refresh on the current tokio runtime. At most one runs at a time.
    pub fn spawn_refresh(&self) -> Option<JoinHandle<bool>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime available, background rate refresh skipped");
            return None;
        };

        if self
            .inner
            .refresh_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.inner.stats.refresh_skipped.fetch_add(1, Ordering::SeqCst);
            debug!("rate refresh already in flight");
            return None;
        }

        // Owned by the future from the start, so a task that never runs still releases the flag
        let guard = InFlightGuard(self.inner.clone());
        let cache = self.clone();
        Some(runtime.spawn(async move {
            let _guard = guard;
            cache.refresh().await
        }))
    }

    // Stale-while-revalidate trigger used by lookups
    fn revalidate_if_stale(&self, freshness: Freshness) {
        if freshness == Freshness::Warm {
            return;
        }
        let now = self.inner.clock.now_millis();
        let last = self.inner.last_refresh_attempt_ms.load(Ordering::SeqCst);
        if now.saturating_sub(last) < self.inner.retry_cooldown_ms {
            return;
        }
        self.spawn_refresh();
    }

    /// Rate for `code` relative to the base. Unknown codes get 1.0 so a purchase flow never blocks.
    pub fn get_rate(&self, code: &str) -> f64 {
        let code = normalize_code(code);
        self.inner.stats.lookups.fetch_add(1, Ordering::SeqCst);

        let (rate, freshness) = {
            let cached = self.inner.cached.read();
            (
                cached.table.rate(&code),
                cached.freshness_at(self.inner.clock.now_millis()),
            )
        };
        self.revalidate_if_stale(freshness);

        match rate {
            Some(rate) => rate,
            None => {
                self.inner
                    .stats
                    .unknown_currency_count
                    .fetch_add(1, Ordering::SeqCst);
                warn!(currency = %code, "unknown currency, defaulting rate to 1.0");
                1.0
            }
        }
    }

    pub fn freshness(&self) -> Freshness {
        self.inner
            .cached
            .read()
            .freshness_at(self.inner.clock.now_millis())
    }

    pub fn table(&self) -> RateTable {
        self.inner.cached.read().table.clone()
    }

    pub fn cached(&self) -> CachedRateTable {
        self.inner.cached.read().clone()
    }

    pub fn base_currency(&self) -> &str {
        &self.inner.base
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh_in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RateCacheStatsReport {
        let stats = &self.inner.stats;
        RateCacheStatsReport {
            lookups: stats.lookups.load(Ordering::SeqCst),
            unknown_currency_count: stats.unknown_currency_count.load(Ordering::SeqCst),
            refresh_attempts: stats.refresh_attempts.load(Ordering::SeqCst),
            refresh_successes: stats.refresh_successes.load(Ordering::SeqCst),
            refresh_failures: stats.refresh_failures.load(Ordering::SeqCst),
            refresh_skipped: stats.refresh_skipped.load(Ordering::SeqCst),
            corrupt_snapshots: stats.corrupt_snapshots.load(Ordering::SeqCst),
        }
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::mock_provider::MockRateProvider;
    use crate::storage::MemoryStore;

    const NOW: i64 = 1_750_000_000_000;

    struct Fixture {
        cache: RateCache,
        store: Arc<MemoryStore>,
        provider: Arc<MockRateProvider>,
        clock: Arc<ManualClock>,
    }

    fn fixture(provider: MockRateProvider) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(provider);
        let clock = Arc::new(ManualClock::new(NOW));
        let cache = RateCache::new(
            &RateCacheConfig::default(),
            store.clone(),
            provider.clone(),
            clock.clone(),
        );
        Fixture {
            cache,
            store,
            provider,
            clock,
        }
    }

    fn write_snapshot(store: &MemoryStore, rates: &[(&str, f64)], timestamp: i64) {
        let data: HashMap<String, f64> = rates.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let json = serde_json::to_string(&Snapshot { data, timestamp }).unwrap();
        store.set("rates:USD", json).unwrap();
    }

    #[test]
    fn test_bootstrap_when_no_snapshot() {
        let f = fixture(MockRateProvider::returning(&[]));

        assert_eq!(f.cache.load(), Freshness::Stale);
        let table = f.cache.table();
        assert!(table.is_bootstrap());
        assert_eq!(table.len(), 1);
        assert_eq!(f.cache.get_rate("USD"), 1.0);
    }

    #[test]
    fn test_load_warm_snapshot() {
        let f = fixture(MockRateProvider::returning(&[]));
        write_snapshot(&f.store, &[("USD", 1.0), ("GHS", 12.0)], NOW - 10 * 60 * 1000);

        assert_eq!(f.cache.load(), Freshness::Warm);
        assert_eq!(f.cache.get_rate(" ghs "), 12.0);
        assert_eq!(f.cache.table().fetched_at(), NOW - 10 * 60 * 1000);
    }

    #[test]
    fn test_load_stale_snapshot_is_still_usable() {
        let f = fixture(MockRateProvider::returning(&[]));
        write_snapshot(&f.store, &[("USD", 1.0), ("EUR", 0.9)], NOW - 2 * 60 * 60 * 1000);

        assert_eq!(f.cache.load(), Freshness::Stale);
        assert_eq!(f.cache.get_rate("EUR"), 0.9);
    }

    #[test]
    fn test_table_turns_stale_as_time_passes() {
        let f = fixture(MockRateProvider::returning(&[]));
        write_snapshot(&f.store, &[("USD", 1.0), ("EUR", 0.9)], NOW);

        assert_eq!(f.cache.load(), Freshness::Warm);
        f.clock.advance(Duration::from_secs(3599));
        assert_eq!(f.cache.freshness(), Freshness::Warm);
        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.cache.freshness(), Freshness::Stale);
    }

    #[test]
    fn test_corrupt_snapshot_is_deleted() {
        let f = fixture(MockRateProvider::returning(&[]));
        f.store.set("rates:USD", "{not json".to_string()).unwrap();

        assert_eq!(f.cache.load(), Freshness::Stale);
        assert!(f.cache.table().is_bootstrap());
        assert!(f.store.get("rates:USD").is_none());
        assert_eq!(f.cache.stats().corrupt_snapshots, 1);
    }

    #[test]
    fn test_snapshot_with_wrong_base_rate_is_corrupt() {
        let f = fixture(MockRateProvider::returning(&[]));
        write_snapshot(&f.store, &[("USD", 2.0), ("GHS", 12.0)], NOW);

        f.cache.load();
        assert!(f.cache.table().is_bootstrap());
        assert!(f.store.get("rates:USD").is_none());
    }

    #[test]
    fn test_from_rates_sanitizes_input() {
        let raw: HashMap<String, f64> = [
            ("gbp".to_string(), 0.8),
            ("BAD".to_string(), -1.0),
            ("NAN".to_string(), f64::NAN),
            ("ZERO".to_string(), 0.0),
        ]
        .into_iter()
        .collect();

        let table = RateTable::from_rates("usd", raw, NOW).unwrap();
        assert_eq!(table.base(), "USD");
        assert_eq!(table.rate("USD"), Some(1.0));
        assert_eq!(table.rate("GBP"), Some(0.8));
        assert_eq!(table.rate("BAD"), None);
        assert_eq!(table.rate("NAN"), None);
        assert_eq!(table.rate("ZERO"), None);
        assert!(table.rates().values().all(|r| *r > 0.0));
    }

    #[test]
    fn test_from_rates_rejects_empty() {
        let raw: HashMap<String, f64> = [("USD".to_string(), 1.0)].into_iter().collect();
        assert_eq!(
            RateTable::from_rates("USD", raw, NOW),
            Err(RateTableError::NoUsableRates)
        );
    }

    #[test]
    fn test_unknown_currency_defaults_to_one() {
        let f = fixture(MockRateProvider::returning(&[]));
        f.cache.load();

        assert_eq!(f.cache.get_rate("XYZ"), 1.0);
        assert_eq!(f.cache.get_rate(""), 1.0);
        let stats = f.cache.stats();
        assert_eq!(stats.unknown_currency_count, 2);
        assert_eq!(stats.lookups, 2);
    }

    #[test]
    fn test_spawn_refresh_without_runtime_is_noop() {
        let f = fixture(MockRateProvider::returning(&[("GHS", 12.0)]));
        assert!(f.cache.spawn_refresh().is_none());
        assert!(!f.cache.is_refreshing());
        assert_eq!(f.provider.call_count(), 0);
    }

    #[test]
    fn test_unpolled_refresh_releases_in_flight_flag() {
        let f = fixture(MockRateProvider::returning(&[("USD", 1.0), ("GHS", 14.0)]));
        write_snapshot(&f.store, &[("USD", 1.0), ("GHS", 12.0)], NOW - 2 * 60 * 60 * 1000);
        f.cache.load();

        // The stale lookup spawns a refresh that never gets polled before the runtime goes away
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async { assert_eq!(f.cache.get_rate("GHS"), 12.0) });
        drop(runtime);

        assert!(!f.cache.is_refreshing());
        assert_eq!(f.provider.call_count(), 0);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let handle = runtime.block_on(async { f.cache.spawn_refresh() });
        let handle = handle.expect("a new refresh should start");
        assert!(runtime.block_on(handle).unwrap());
        assert_eq!(f.cache.get_rate("GHS"), 14.0);
        assert!(!f.cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_success_replaces_and_persists() {
        let f = fixture(MockRateProvider::returning(&[("USD", 1.0), ("GHS", 12.0)]));
        f.cache.load();

        assert!(f.cache.refresh().await);
        assert_eq!(f.cache.get_rate("GHS"), 12.0);
        assert_eq!(f.cache.freshness(), Freshness::Warm);

        let raw = f.store.get("rates:USD").unwrap();
        let snapshot: Snapshot<HashMap<String, f64>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot.timestamp, NOW);
        assert_eq!(snapshot.data["GHS"], 12.0);
        assert_eq!(f.cache.stats().refresh_successes, 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_table() {
        let f = fixture(MockRateProvider::returning(&[("USD", 1.0), ("GHS", 15.0)]));
        write_snapshot(&f.store, &[("USD", 1.0), ("GHS", 12.0)], NOW - 2 * 60 * 60 * 1000);
        f.cache.load();

        f.provider.fail_next(FetchError::Status(500));
        assert!(!f.cache.refresh().await);
        assert_eq!(f.cache.get_rate("GHS"), 12.0);
        assert_eq!(f.cache.freshness(), Freshness::Stale);

        let stats = f.cache.stats();
        assert_eq!(stats.refresh_failures, 1);
        assert_eq!(stats.refresh_successes, 0);
    }

    #[tokio::test]
    async fn test_refresh_with_inconsistent_base_is_a_failure() {
        let f = fixture(MockRateProvider::returning(&[("USD", 3.0), ("GHS", 12.0)]));
        f.cache.load();

        assert!(!f.cache.refresh().await);
        assert!(f.cache.table().is_bootstrap());
        assert!(f.store.get("rates:USD").is_none());
    }

    #[tokio::test]
    async fn test_refresh_survives_storage_failure() {
        let store = Arc::new(MemoryStore::with_quota(8));
        let cache = RateCache::new(
            &RateCacheConfig::default(),
            store.clone(),
            Arc::new(MockRateProvider::returning(&[("USD", 1.0), ("GHS", 12.0)])),
            Arc::new(ManualClock::new(NOW)),
        );

        assert!(cache.refresh().await);
        assert_eq!(cache.get_rate("GHS"), 12.0);
        assert!(store.get("rates:USD").is_none());
    }

    #[tokio::test]
    async fn test_single_refresh_in_flight_serves_old_table() {
        let provider = MockRateProvider::returning(&[("USD", 1.0), ("GHS", 13.0)])
            .with_delay(Duration::from_millis(50));
        let f = fixture(provider);
        write_snapshot(&f.store, &[("USD", 1.0), ("GHS", 12.0)], NOW);
        f.cache.load();

        let handle = f.cache.spawn_refresh().expect("refresh should start");
        assert!(f.cache.is_refreshing());
        assert!(f.cache.spawn_refresh().is_none());

        // Lookups keep answering from the last-known table while the fetch is pending
        assert_eq!(f.cache.get_rate("GHS"), 12.0);

        assert!(handle.await.unwrap());
        assert_eq!(f.cache.get_rate("GHS"), 13.0);
        assert!(!f.cache.is_refreshing());
        assert_eq!(f.provider.call_count(), 1);
        assert_eq!(f.cache.stats().refresh_skipped, 1);
    }

    #[tokio::test]
    async fn test_stale_lookup_triggers_background_refresh() {
        let f = fixture(MockRateProvider::returning(&[("USD", 1.0), ("GHS", 14.0)]));
        write_snapshot(&f.store, &[("USD", 1.0), ("GHS", 12.0)], NOW - 2 * 60 * 60 * 1000);
        f.cache.load();

        // Served from the stale table, refresh kicks off behind the scenes
        assert_eq!(f.cache.get_rate("GHS"), 12.0);

        for _ in 0..50 {
            if f.cache.stats().refresh_successes == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.cache.get_rate("GHS"), 14.0);
        assert_eq!(f.cache.freshness(), Freshness::Warm);
    }

    #[tokio::test]
    async fn test_failed_revalidation_respects_cooldown() {
        let f = fixture(MockRateProvider::returning(&[("USD", 1.0), ("GHS", 14.0)]));
        f.cache.load();
        f.provider.fail_next(FetchError::Transport("offline".to_string()));

        f.cache.get_rate("GHS");
        for _ in 0..50 {
            if f.cache.stats().refresh_failures == 1 && !f.cache.is_refreshing() {
                break;
            }
            tokio::task::yield_now().await;
        }

        // Still inside the cooldown: no second attempt
        f.cache.get_rate("GHS");
        tokio::task::yield_now().await;
        assert_eq!(f.provider.call_count(), 1);

        f.clock.advance(Duration::from_secs(61));
        f.cache.get_rate("GHS");
        for _ in 0..50 {
            if f.cache.stats().refresh_successes == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.provider.call_count(), 2);
        assert_eq!(f.cache.get_rate("GHS"), 14.0);
    }
}
