//! The ticking refresh driver.
//!
//! One loop owns all cadence decisions. Every tick it walks the live
//! instances and submits the keys that are due:
//!
//! - viewer-driven: the key has at least one viewer, its interval is
//!   non-zero, and the interval has elapsed since the last accepted attempt
//! - background: the adapter declares a background interval, which is due
//!   regardless of viewers
//!
//! An interval of zero means "never poll". Keys nobody watches simply don't
//! refresh; the wall-clock elapsed test means a key whose viewers return
//! after a long absence is due on the next tick, not after a full interval.
//!
//! Submission bookkeeping only advances when the executor accepts the
//! task — a skip (already in flight) leaves the key due so the tick after
//! the slow refresh finishes picks it up again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gridhub_core::size::ModuleKey;
use gridhub_modules::ModuleRegistry;

use crate::cache::ModuleDataCache;
use crate::executor::{RefreshExecutor, SubmitOutcome};
use crate::hub::ConnectionHub;

/// Cadence driver over the live-instance table.
pub struct RefreshScheduler {
    registry: Arc<ModuleRegistry>,
    hub: Arc<ConnectionHub>,
    executor: Arc<RefreshExecutor>,
    cache: Arc<ModuleDataCache>,
    tick: Duration,
    /// Last accepted submission per key (viewer-driven clock).
    attempts: Mutex<HashMap<ModuleKey, Instant>>,
    /// Last accepted background submission per key.
    background: Mutex<HashMap<ModuleKey, Instant>>,
}

impl RefreshScheduler {
    /// Create a scheduler ticking at `tick`.
    #[must_use]
    pub fn new(
        registry: Arc<ModuleRegistry>,
        hub: Arc<ConnectionHub>,
        executor: Arc<RefreshExecutor>,
        cache: Arc<ModuleDataCache>,
        tick: Duration,
    ) -> Self {
        Self {
            registry,
            hub,
            executor,
            cache,
            tick,
            attempts: Mutex::new(HashMap::new()),
            background: Mutex::new(HashMap::new()),
        }
    }

    /// Drive the tick loop until cancelled.
    ///
    /// `demand` carries keys that want an immediate refresh (a subscriber
    /// arrived and found nothing cached); they bypass the cadence test but
    /// not single-flight.
    pub async fn run(
        self: Arc<Self>,
        mut demand: mpsc::Receiver<ModuleKey>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick = ?self.tick, "refresh scheduler running");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("refresh scheduler stopped");
                    break;
                }
                _ = ticker.tick() => self.tick_once(),
                Some(key) = demand.recv() => self.on_demand(key),
            }
        }
    }

    /// Evaluate every live key once and submit what is due.
    pub fn tick_once(&self) {
        let now = Instant::now();
        let mut live = HashSet::new();

        for instance in self.registry.instances() {
            let adapter = instance.adapter();
            let bg_interval = adapter.background_interval();

            for key in instance.keys() {
                let _ = live.insert(key.clone());
                let interval = adapter.refresh_interval(&key.size);

                let due = {
                    let viewers = self.hub.viewer_count(&key);
                    viewers > 0
                        && !interval.is_zero()
                        && self.elapsed(&self.attempts, &key, now).map_or(true, |e| e >= interval)
                };
                let background_due = !bg_interval.is_zero()
                    && self
                        .elapsed(&self.background, &key, now)
                        .map_or(true, |e| e >= bg_interval);

                if !(due || background_due) {
                    continue;
                }

                if self.executor.submit(key.clone()) == SubmitOutcome::Submitted {
                    debug!(%key, due, background_due, "refresh submitted");
                    let _ = self.attempts.lock().insert(key.clone(), now);
                    if background_due {
                        let _ = self.background.lock().insert(key, now);
                    }
                }
            }
        }

        // Bookkeeping for deactivated instances would otherwise live forever.
        self.attempts.lock().retain(|key, _| live.contains(key));
        self.background.lock().retain(|key, _| live.contains(key));
    }

    /// Submit a key immediately, outside the cadence test.
    ///
    /// Demand signals mean "a subscriber found nothing cached"; if a payload
    /// landed while the signal was queued there is nothing left to do.
    pub fn on_demand(&self, key: ModuleKey) {
        if self
            .cache
            .get(&key)
            .is_some_and(|entry| entry.payload.is_some())
        {
            return;
        }
        debug!(%key, "on-demand refresh");
        if self.executor.submit(key.clone()) == SubmitOutcome::Submitted {
            let _ = self.attempts.lock().insert(key, Instant::now());
        }
    }

    fn elapsed(
        &self,
        clock: &Mutex<HashMap<ModuleKey, Instant>>,
        key: &ModuleKey,
        now: Instant,
    ) -> Option<Duration> {
        clock.lock().get(key).map(|at| now.duration_since(*at))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    use gridhub_core::errors::{FieldErrors, ModuleError};
    use gridhub_core::ids::{ConnectionId, ModuleId};
    use gridhub_core::size::Size;
    use gridhub_modules::module::RefreshContext;
    use gridhub_modules::{ArtifactCache, Module, ModuleFactory, SettingsMap};

    use crate::cache::ModuleDataCache;
    use crate::viewer::Viewer;

    /// Cadence comes from settings: `interval_ms` per refresh,
    /// `background_ms` for the viewer-independent clock (0 = none).
    struct CadenceModule {
        interval: Duration,
        background: Duration,
        refreshes: AtomicU32,
    }

    #[async_trait]
    impl Module for CadenceModule {
        fn kind(&self) -> &'static str {
            "cadence"
        }
        fn sizes(&self) -> Vec<Size> {
            vec![Size::new("1x1")]
        }
        fn refresh_interval(&self, _size: &Size) -> Duration {
            self.interval
        }
        fn background_interval(&self) -> Duration {
            self.background
        }
        async fn refresh(&self, _size: &Size, _ctx: &RefreshContext) -> Result<Value, ModuleError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "n": n }))
        }
    }

    struct CadenceFactory;

    impl ModuleFactory for CadenceFactory {
        fn kind(&self) -> &'static str {
            "cadence"
        }
        fn validate_settings(&self, _settings: &SettingsMap) -> Option<FieldErrors> {
            None
        }
        fn build(&self, settings: SettingsMap) -> Result<Arc<dyn Module>, ModuleError> {
            let ms = |field: &str| {
                settings
                    .get(field)
                    .and_then(|v| v.parse().ok())
                    .map_or(Duration::ZERO, Duration::from_millis)
            };
            Ok(Arc::new(CadenceModule {
                interval: ms("interval_ms"),
                background: ms("background_ms"),
                refreshes: AtomicU32::new(0),
            }))
        }
    }

    struct Fixture {
        registry: Arc<ModuleRegistry>,
        cache: Arc<ModuleDataCache>,
        hub: Arc<ConnectionHub>,
        scheduler: Arc<RefreshScheduler>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let mut registry = ModuleRegistry::new();
        registry.register_factory(Arc::new(CadenceFactory));
        let registry = Arc::new(registry);
        let cache = Arc::new(ModuleDataCache::new());
        let (demand_tx, _demand_rx) = mpsc::channel(16);
        let hub = Arc::new(ConnectionHub::new(
            registry.clone(),
            cache.clone(),
            demand_tx,
            Duration::from_secs(1),
        ));
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RefreshExecutor::new(
            registry.clone(),
            cache.clone(),
            hub.clone(),
            4,
            4,
            Arc::new(ArtifactCache::new(dir.path())),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            registry.clone(),
            hub.clone(),
            executor,
            cache.clone(),
            Duration::from_millis(10),
        ));
        Fixture {
            registry,
            cache,
            hub,
            scheduler,
            _dir: dir,
        }
    }

    fn activate(fx: &Fixture, id: &str, interval_ms: u64, background_ms: u64) -> ModuleKey {
        let settings = SettingsMap::from([
            ("interval_ms".to_owned(), interval_ms.to_string()),
            ("background_ms".to_owned(), background_ms.to_string()),
        ]);
        let _ = fx
            .registry
            .activate("cadence", ModuleId::from(id), settings)
            .unwrap();
        ModuleKey::new(id, "1x1")
    }

    async fn watch(fx: &Fixture, conn: &str, key: &ModuleKey) {
        let (tx, rx) = mpsc::channel(64);
        // Receiver leaks so the viewer stays deliverable for the test.
        std::mem::forget(rx);
        fx.hub
            .register(Arc::new(Viewer::new(ConnectionId::from(conn), tx)));
        fx.hub.subscribe(&ConnectionId::from(conn), key.clone()).await;
    }

    async fn refresh_count(fx: &Fixture, key: &ModuleKey) -> u32 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        fx.cache
            .get(key)
            .and_then(|entry| entry.payload)
            .and_then(|payload| payload["n"].as_u64())
            .map_or(0, |n| n as u32)
    }

    #[tokio::test]
    async fn unwatched_key_never_refreshes() {
        let fx = fixture();
        let key = activate(&fx, "m1", 10, 0);
        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 0);
    }

    #[tokio::test]
    async fn watched_key_refreshes_on_first_tick() {
        let fx = fixture();
        let key = activate(&fx, "m1", 10_000, 0);
        watch(&fx, "c1", &key).await;
        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 1);
    }

    #[tokio::test]
    async fn interval_gates_subsequent_ticks() {
        let fx = fixture();
        let key = activate(&fx, "m1", 10_000, 0);
        watch(&fx, "c1", &key).await;

        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 1);
        // Interval far from elapsed: further ticks are no-ops.
        fx.scheduler.tick_once();
        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 1);
    }

    #[tokio::test]
    async fn elapsed_interval_triggers_again() {
        let fx = fixture();
        let key = activate(&fx, "m1", 20, 0);
        watch(&fx, "c1", &key).await;

        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 1);
        tokio::time::sleep(Duration::from_millis(25)).await;
        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 2);
    }

    #[tokio::test]
    async fn zero_interval_means_never_poll() {
        let fx = fixture();
        let key = activate(&fx, "m1", 0, 0);
        watch(&fx, "c1", &key).await;
        fx.scheduler.tick_once();
        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 0);
    }

    #[tokio::test]
    async fn background_interval_ignores_viewers() {
        let fx = fixture();
        let key = activate(&fx, "m1", 0, 10_000);
        // No viewers at all.
        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 1);
        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 1, "background clock gates");
    }

    #[tokio::test]
    async fn on_demand_bypasses_cadence() {
        let fx = fixture();
        let key = activate(&fx, "m1", 10_000, 0);
        // No viewers; scheduler would never submit this on a tick.
        fx.scheduler.on_demand(key.clone());
        assert_eq!(refresh_count(&fx, &key).await, 1);
    }

    #[tokio::test]
    async fn on_demand_is_a_noop_once_cached() {
        let fx = fixture();
        let key = activate(&fx, "m1", 10_000, 0);
        fx.scheduler.on_demand(key.clone());
        assert_eq!(refresh_count(&fx, &key).await, 1);
        // A queued demand signal arriving after the payload landed does
        // nothing.
        fx.scheduler.on_demand(key.clone());
        assert_eq!(refresh_count(&fx, &key).await, 1);
    }

    #[tokio::test]
    async fn deactivated_instance_is_forgotten() {
        let fx = fixture();
        let key = activate(&fx, "m1", 10_000, 0);
        watch(&fx, "c1", &key).await;
        fx.scheduler.tick_once();
        assert_eq!(refresh_count(&fx, &key).await, 1);

        let _ = fx.registry.deactivate(&ModuleId::from("m1"));
        fx.scheduler.tick_once();
        assert!(fx.scheduler.attempts.lock().is_empty(), "bookkeeping pruned");
    }

    #[tokio::test]
    async fn run_loop_ticks_until_cancelled() {
        let fx = fixture();
        let key = activate(&fx, "m1", 15, 0);
        watch(&fx, "c1", &key).await;

        let (_demand_tx, demand_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(fx.scheduler.clone().run(demand_rx, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(refresh_count(&fx, &key).await >= 2, "kept refreshing on cadence");
    }

    #[tokio::test]
    async fn demand_channel_feeds_the_loop() {
        let fx = fixture();
        let key = activate(&fx, "m1", 0, 0); // never polled

        let (demand_tx, demand_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(fx.scheduler.clone().run(demand_rx, cancel.clone()));

        demand_tx.send(key.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(refresh_count(&fx, &key).await, 1);
    }
}
