//! Viewer subscription index and broadcast fan-out.
//!
//! Tracks which connection watches which (module instance, size) key and
//! fires adapter lifecycle hooks on the key's 0→1 and 1→0 viewer
//! transitions. Transitions are serialized by a per-key async mutex so each
//! hook fires exactly once even under concurrent subscribe/unsubscribe
//! storms; unrelated keys never wait on each other.
//!
//! Delivery is best-effort per connection: a viewer whose queue is gone is
//! dropped through the disconnect path without affecting anyone else.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gridhub_core::ids::ConnectionId;
use gridhub_core::size::ModuleKey;
use gridhub_core::wire::ServerMessage;
use gridhub_modules::ModuleRegistry;

use crate::cache::ModuleDataCache;
use crate::viewer::Viewer;

/// Bidirectional connection ↔ key index with lifecycle hooks.
pub struct ConnectionHub {
    registry: Arc<ModuleRegistry>,
    cache: Arc<ModuleDataCache>,
    viewers: DashMap<ConnectionId, Arc<Viewer>>,
    subscriptions: DashMap<ModuleKey, HashSet<ConnectionId>>,
    key_locks: DashMap<ModuleKey, Arc<tokio::sync::Mutex<()>>>,
    demand_tx: mpsc::Sender<ModuleKey>,
    hook_timeout: Duration,
}

impl ConnectionHub {
    /// Create a hub. `demand_tx` feeds the scheduler keys that need an
    /// immediate refresh (a subscriber arrived and found nothing cached).
    #[must_use]
    pub fn new(
        registry: Arc<ModuleRegistry>,
        cache: Arc<ModuleDataCache>,
        demand_tx: mpsc::Sender<ModuleKey>,
        hook_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            viewers: DashMap::new(),
            subscriptions: DashMap::new(),
            key_locks: DashMap::new(),
            demand_tx,
            hook_timeout,
        }
    }

    /// Register a connected viewer.
    pub fn register(&self, viewer: Arc<Viewer>) {
        let _ = self.viewers.insert(viewer.id.clone(), viewer);
    }

    /// Look up a registered viewer.
    #[must_use]
    pub fn viewer(&self, id: &ConnectionId) -> Option<Arc<Viewer>> {
        self.viewers.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.viewers.len()
    }

    /// Number of viewers currently subscribed to a key.
    #[must_use]
    pub fn viewer_count(&self, key: &ModuleKey) -> usize {
        self.subscriptions.get(key).map_or(0, |subs| subs.len())
    }

    /// Subscribe a connection to a key.
    ///
    /// On the key's first subscriber the adapter's first-viewer hook runs
    /// under a bounded timeout. The new viewer then immediately receives the
    /// cached payload if one exists; otherwise the key is signalled for an
    /// on-demand refresh.
    pub async fn subscribe(&self, conn_id: &ConnectionId, key: ModuleKey) {
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let became_first = {
            let mut subs = self.subscriptions.entry(key.clone()).or_default();
            let inserted = subs.insert(conn_id.clone());
            inserted && subs.len() == 1
        };

        debug!(conn = %conn_id, %key, became_first, "subscribe");

        if became_first {
            self.fire_first_viewer(&key).await;
        }

        match self.cache.get(&key).and_then(|entry| entry.payload) {
            Some(payload) => {
                if let Some(viewer) = self.viewer(conn_id) {
                    if !viewer.send_message(&ServerMessage::data_update(&key, payload)) {
                        debug!(conn = %conn_id, %key, "initial delivery failed");
                    }
                }
            }
            None => {
                if self.demand_tx.try_send(key.clone()).is_err() {
                    debug!(%key, "demand queue full; next tick covers the key");
                }
            }
        }
    }

    /// Unsubscribe a connection from a key.
    ///
    /// On the key's last unsubscriber the adapter's last-viewer hook runs,
    /// same best-effort timeout policy as subscribe.
    pub async fn unsubscribe(&self, conn_id: &ConnectionId, key: &ModuleKey) {
        let lock = self.key_lock(key);
        let became_empty = {
            let _guard = lock.lock().await;

            let became_empty = match self.subscriptions.get_mut(key) {
                Some(mut subs) => subs.remove(conn_id) && subs.is_empty(),
                None => false,
            };

            if became_empty {
                let _ = self.subscriptions.remove(key);
                debug!(conn = %conn_id, %key, "last viewer left");
                self.fire_last_viewer(key).await;
            }
            became_empty
        };

        drop(lock);
        if became_empty {
            // A lock held only by the map has no waiters, so removing it
            // cannot let two transitions run unserialized. A later
            // subscriber mints a fresh one.
            let _ = self
                .key_locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    /// Remove a connection entirely: drop the viewer handle and walk its
    /// subscriptions through the unsubscribe path (firing 1→0 hooks where
    /// it was the last viewer).
    pub async fn disconnect(&self, conn_id: &ConnectionId) {
        let removed = self.viewers.remove(conn_id).is_some();

        let keys: Vec<ModuleKey> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().contains(conn_id))
            .map(|entry| entry.key().clone())
            .collect();

        for key in &keys {
            self.unsubscribe(conn_id, key).await;
        }

        if removed {
            debug!(conn = %conn_id, keys = keys.len(), "viewer disconnected");
        }
    }

    /// Fan a refreshed payload out to every viewer of a key.
    ///
    /// Serialized once; best-effort per connection. Viewers whose send fails
    /// are dropped through the disconnect path.
    pub async fn broadcast(&self, key: &ModuleKey, payload: Value) {
        let message = ServerMessage::data_update(key, payload);
        let frame = match serde_json::to_string(&message) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(%key, error = %e, "failed to serialize data-update");
                return;
            }
        };

        let targets: Vec<ConnectionId> = self
            .subscriptions
            .get(key)
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default();

        debug!(%key, recipients = targets.len(), "broadcast");

        let mut failed = Vec::new();
        for conn_id in targets {
            match self.viewers.get(&conn_id) {
                Some(viewer) if viewer.send(frame.clone()) => {}
                _ => failed.push(conn_id),
            }
        }

        for conn_id in failed {
            warn!(conn = %conn_id, %key, "dropping viewer after failed delivery");
            self.disconnect(&conn_id).await;
        }
    }

    fn key_lock(&self, key: &ModuleKey) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks.entry(key.clone()).or_default().clone()
    }

    async fn fire_first_viewer(&self, key: &ModuleKey) {
        let Some(instance) = self.registry.get(&key.module_id) else {
            return;
        };
        let adapter = instance.adapter().clone();
        if tokio::time::timeout(self.hook_timeout, adapter.on_first_viewer())
            .await
            .is_err()
        {
            warn!(%key, timeout = ?self.hook_timeout, "first-viewer hook timed out");
        }
    }

    async fn fire_last_viewer(&self, key: &ModuleKey) {
        let Some(instance) = self.registry.get(&key.module_id) else {
            return;
        };
        let adapter = instance.adapter().clone();
        if tokio::time::timeout(self.hook_timeout, adapter.on_last_viewer())
            .await
            .is_err()
        {
            warn!(%key, timeout = ?self.hook_timeout, "last-viewer hook timed out");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    use gridhub_core::errors::{FieldErrors, ModuleError};
    use gridhub_core::size::Size;
    use gridhub_modules::module::RefreshContext;
    use gridhub_modules::{Module, ModuleFactory, SettingsMap};

    struct HookCountModule {
        first: AtomicU32,
        last: AtomicU32,
    }

    #[async_trait]
    impl Module for HookCountModule {
        fn kind(&self) -> &'static str {
            "hooked"
        }
        fn sizes(&self) -> Vec<Size> {
            vec![Size::new("1x1")]
        }
        fn refresh_interval(&self, _size: &Size) -> Duration {
            Duration::from_secs(5)
        }
        async fn refresh(&self, _size: &Size, _ctx: &RefreshContext) -> Result<Value, ModuleError> {
            Ok(json!({}))
        }
        async fn on_first_viewer(&self) {
            let _ = self.first.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_last_viewer(&self) {
            let _ = self.last.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct HookCountFactory(Arc<HookCountModule>);

    impl ModuleFactory for HookCountFactory {
        fn kind(&self) -> &'static str {
            "hooked"
        }
        fn validate_settings(&self, _settings: &SettingsMap) -> Option<FieldErrors> {
            None
        }
        fn build(&self, _settings: SettingsMap) -> Result<Arc<dyn Module>, ModuleError> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        hub: Arc<ConnectionHub>,
        cache: Arc<ModuleDataCache>,
        module: Arc<HookCountModule>,
        demand_rx: mpsc::Receiver<ModuleKey>,
    }

    fn fixture() -> Fixture {
        let module = Arc::new(HookCountModule {
            first: AtomicU32::new(0),
            last: AtomicU32::new(0),
        });
        let mut registry = ModuleRegistry::new();
        registry.register_factory(Arc::new(HookCountFactory(module.clone())));
        let registry = Arc::new(registry);
        let _ = registry
            .activate("hooked", "h1".into(), SettingsMap::new())
            .unwrap();

        let cache = Arc::new(ModuleDataCache::new());
        let (demand_tx, demand_rx) = mpsc::channel(16);
        let hub = Arc::new(ConnectionHub::new(
            registry,
            cache.clone(),
            demand_tx,
            Duration::from_secs(1),
        ));
        Fixture {
            hub,
            cache,
            module,
            demand_rx,
        }
    }

    fn connect(hub: &ConnectionHub, id: &str) -> mpsc::Receiver<Arc<String>> {
        let (tx, rx) = mpsc::channel(32);
        hub.register(Arc::new(Viewer::new(ConnectionId::from(id), tx)));
        rx
    }

    fn key() -> ModuleKey {
        ModuleKey::new("h1", "1x1")
    }

    #[tokio::test]
    async fn subscribe_increments_viewer_count() {
        let fx = fixture();
        let _rx = connect(&fx.hub, "c1");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        assert_eq!(fx.hub.viewer_count(&key()), 1);
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_idempotent() {
        let fx = fixture();
        let _rx = connect(&fx.hub, "c1");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        assert_eq!(fx.hub.viewer_count(&key()), 1);
        assert_eq!(fx.module.first.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_viewer_hook_fires_exactly_once_under_storm() {
        let fx = fixture();
        let n = 8;
        for i in 0..n {
            let _rx = Box::leak(Box::new(connect(&fx.hub, &format!("c{i}"))));
        }

        let mut handles = Vec::new();
        for i in 0..n {
            let hub = fx.hub.clone();
            handles.push(tokio::spawn(async move {
                hub.subscribe(&ConnectionId::from(format!("c{i}").as_str()), key())
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(fx.hub.viewer_count(&key()), n as usize);
        assert_eq!(fx.module.first.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn last_viewer_hook_fires_exactly_once() {
        let fx = fixture();
        let _rx1 = connect(&fx.hub, "c1");
        let _rx2 = connect(&fx.hub, "c2");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        fx.hub.subscribe(&ConnectionId::from("c2"), key()).await;

        fx.hub.unsubscribe(&ConnectionId::from("c1"), &key()).await;
        assert_eq!(fx.module.last.load(Ordering::SeqCst), 0);
        fx.hub.unsubscribe(&ConnectionId::from("c2"), &key()).await;
        assert_eq!(fx.module.last.load(Ordering::SeqCst), 1);

        // Unsubscribing again does not re-fire.
        fx.hub.unsubscribe(&ConnectionId::from("c2"), &key()).await;
        assert_eq!(fx.module.last.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resubscribe_after_empty_fires_first_hook_again() {
        let fx = fixture();
        let _rx = connect(&fx.hub, "c1");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        fx.hub.unsubscribe(&ConnectionId::from("c1"), &key()).await;
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        assert_eq!(fx.module.first.load(Ordering::SeqCst), 2);
        assert_eq!(fx.module.last.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn key_lock_is_pruned_when_subscriptions_empty() {
        let fx = fixture();
        let _rx = connect(&fx.hub, "c1");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        assert_eq!(fx.hub.key_locks.len(), 1);

        fx.hub.unsubscribe(&ConnectionId::from("c1"), &key()).await;
        assert!(fx.hub.key_locks.is_empty(), "no viewers, no lock entry");

        // A returning subscriber gets a fresh lock and the hook still fires.
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        assert_eq!(fx.hub.key_locks.len(), 1);
        assert_eq!(fx.module.first.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscriber_receives_cached_entry_immediately() {
        let fx = fixture();
        assert!(fx.cache.apply_if_newer(&key(), 1, json!({"cached": true})));

        let mut rx = connect(&fx.hub, "c1");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;

        let frame = rx.try_recv().expect("cached entry delivered at subscribe");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "data-update");
        assert_eq!(value["payload"]["cached"], true);
    }

    #[tokio::test]
    async fn empty_cache_signals_demand_refresh() {
        let mut fx = fixture();
        let _rx = connect(&fx.hub, "c1");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        assert_eq!(fx.demand_rx.try_recv().unwrap(), key());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_subscribers() {
        let fx = fixture();
        let mut rx1 = connect(&fx.hub, "c1");
        let mut rx2 = connect(&fx.hub, "c2");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        // c2 registered but not subscribed

        fx.hub.broadcast(&key(), json!({"n": 1})).await;
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_delivery_drops_the_viewer() {
        let fx = fixture();
        let rx1 = connect(&fx.hub, "c1");
        let mut rx2 = connect(&fx.hub, "c2");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;
        fx.hub.subscribe(&ConnectionId::from("c2"), key()).await;

        drop(rx1); // c1's write task is gone
        fx.hub.broadcast(&key(), json!({"n": 2})).await;

        assert!(rx2.try_recv().is_ok(), "healthy viewer unaffected");
        assert_eq!(fx.hub.viewer_count(&key()), 1, "dead viewer unsubscribed");
        assert!(fx.hub.viewer(&ConnectionId::from("c1")).is_none());
        // c1 was the non-last viewer, so no last-viewer hook
        assert_eq!(fx.module.last.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disconnect_unsubscribes_everything() {
        let fx = fixture();
        let _rx = connect(&fx.hub, "c1");
        fx.hub.subscribe(&ConnectionId::from("c1"), key()).await;

        fx.hub.disconnect(&ConnectionId::from("c1")).await;
        assert_eq!(fx.hub.viewer_count(&key()), 0);
        assert_eq!(fx.hub.connection_count(), 0);
        assert_eq!(fx.module.last.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_is_harmless() {
        let fx = fixture();
        fx.hub.broadcast(&key(), json!({"n": 3})).await;
        assert_eq!(fx.hub.viewer_count(&key()), 0);
    }
}
