//! Bounded refresh execution.
//!
//! The executor owns the only path from "this key is due" to "viewers got a
//! payload". It enforces three rules:
//!
//! - single-flight: at most one refresh in flight per (instance, size) key;
//!   a duplicate submission is skipped, not queued
//! - bounded concurrency: all refreshes share one semaphore-limited pool
//! - monotonic apply: every submission carries a process-wide trigger stamp,
//!   and a result only lands in the cache (and broadcasts) if nothing newer
//!   landed first
//!
//! A refresh that exceeds the adapter's declared timeout, or whose instance
//! was deactivated while it ran, contributes nothing: timeout counts as a
//! failure, deactivation discards the result silently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use gridhub_core::size::ModuleKey;
use gridhub_modules::module::RefreshContext;
use gridhub_modules::{ArtifactCache, FetchScope, ModuleRegistry};

use crate::cache::ModuleDataCache;
use crate::hub::ConnectionHub;

/// Process-wide trigger stamp source. Stamps are assigned at submission, so
/// submission order is stamp order and ties cannot happen.
#[derive(Debug, Default)]
struct TriggerSeq(AtomicU64);

impl TriggerSeq {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// One accepted refresh submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTask {
    /// The key being refreshed.
    pub key: ModuleKey,
    /// Trigger stamp assigned at submission.
    pub stamp: u64,
}

/// What happened to a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The refresh was accepted and is (or will be) running.
    Submitted,
    /// A refresh for the same key was already in flight; nothing queued.
    Skipped,
}

/// Shared-pool refresh executor.
pub struct RefreshExecutor {
    registry: Arc<ModuleRegistry>,
    cache: Arc<ModuleDataCache>,
    hub: Arc<ConnectionHub>,
    workers: Arc<Semaphore>,
    inflight: DashMap<ModuleKey, ()>,
    seq: TriggerSeq,
    sub_fetch_limit: usize,
    artifacts: Arc<ArtifactCache>,
}

impl RefreshExecutor {
    /// Create an executor with `workers` pool slots.
    #[must_use]
    pub fn new(
        registry: Arc<ModuleRegistry>,
        cache: Arc<ModuleDataCache>,
        hub: Arc<ConnectionHub>,
        workers: usize,
        sub_fetch_limit: usize,
        artifacts: Arc<ArtifactCache>,
    ) -> Self {
        Self {
            registry,
            cache,
            hub,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            inflight: DashMap::new(),
            seq: TriggerSeq::default(),
            sub_fetch_limit,
            artifacts,
        }
    }

    /// Submit a key for refresh.
    ///
    /// Stamps the trigger, claims the single-flight slot, and spawns the
    /// work. A key already in flight is skipped without queueing.
    pub fn submit(self: &Arc<Self>, key: ModuleKey) -> SubmitOutcome {
        use dashmap::mapref::entry::Entry;

        match self.inflight.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!(%key, "refresh already in flight, skipping");
                return SubmitOutcome::Skipped;
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(());
            }
        }

        let task = RefreshTask {
            key,
            stamp: self.seq.next(),
        };
        let executor = self.clone();
        drop(tokio::spawn(async move {
            executor.run(task).await;
        }));
        SubmitOutcome::Submitted
    }

    /// Whether a refresh for the key is currently in flight.
    #[must_use]
    pub fn in_flight(&self, key: &ModuleKey) -> bool {
        self.inflight.contains_key(key)
    }

    async fn run(self: Arc<Self>, task: RefreshTask) {
        // Closed only at shutdown; an error here just means no more work.
        if let Ok(permit) = self.workers.clone().acquire_owned().await {
            self.attempt(&task).await;
            drop(permit);
        }
        let _ = self.inflight.remove(&task.key);
    }

    async fn attempt(&self, task: &RefreshTask) {
        let RefreshTask { key, stamp } = task;

        // Instance gone between submission and execution: nothing to do.
        let Some(instance) = self.registry.get(&key.module_id) else {
            debug!(%key, "instance deactivated before refresh ran");
            return;
        };
        let adapter = instance.adapter().clone();

        let ctx = RefreshContext {
            scope: FetchScope::new(self.sub_fetch_limit),
            artifacts: self.artifacts.clone(),
        };
        let timeout = adapter.refresh_timeout();

        match tokio::time::timeout(timeout, adapter.refresh(&key.size, &ctx)).await {
            Ok(Ok(payload)) => {
                if self.apply_result(key, *stamp, payload.clone()) {
                    self.hub.broadcast(key, payload).await;
                }
            }
            Ok(Err(e)) => {
                let failures = self.cache.record_failure(key);
                warn!(%key, error = %e, consecutive_failures = failures, "refresh failed");
            }
            Err(_) => {
                let failures = self.cache.record_failure(key);
                warn!(
                    %key,
                    timeout = ?timeout,
                    consecutive_failures = failures,
                    "refresh timed out"
                );
            }
        }
    }

    /// Land a completed refresh in the cache; returns whether to broadcast.
    ///
    /// Deactivation can purge the cache between the liveness check and the
    /// write, so the check runs again after the apply and undoes a write
    /// that landed for an instance no longer live.
    fn apply_result(&self, key: &ModuleKey, stamp: u64, payload: Value) -> bool {
        if !self.registry.contains(&key.module_id) {
            debug!(%key, "instance deactivated mid-refresh, result discarded");
            return false;
        }
        if !self.cache.apply_if_newer(key, stamp, payload) {
            debug!(%key, stamp, "stale refresh result, not applied");
            return false;
        }
        if !self.registry.contains(&key.module_id) {
            self.cache.remove_module(&key.module_id);
            debug!(%key, "instance deactivated during apply, entry dropped");
            return false;
        }
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
