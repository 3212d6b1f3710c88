//! Thread-safe last-known-good store for module payloads.
//!
//! Keyed by (module instance, size). The sole success mutator is
//! [`ModuleDataCache::apply_if_newer`], which enforces the monotonic-apply
//! rule: a result only lands if its trigger stamp is greater than the stamp
//! already recorded for that key, so refreshes finishing out of submission
//! order can never roll the cache backwards. Failures touch bookkeeping
//! only — the stale payload keeps being served.

use dashmap::DashMap;
use serde_json::Value;

use gridhub_core::ids::ModuleId;
use gridhub_core::size::ModuleKey;

/// Outcome of the most recent completed refresh attempt for a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshStatus {
    /// The last attempt produced a payload.
    Success,
    /// The last attempt failed; the payload (if any) predates it.
    Failed,
}

/// Cached state for one (module instance, size) key.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Last-known-good payload. `None` until the first successful refresh.
    pub payload: Option<Value>,
    /// Trigger stamp of the refresh that produced `payload` (0 if none yet).
    pub stamp: u64,
    /// Outcome of the most recent completed attempt.
    pub status: RefreshStatus,
    /// Completed failed attempts since the last success.
    pub consecutive_failures: u32,
}

/// Sharded last-known-good store. Unrelated keys never contend.
pub struct ModuleDataCache {
    entries: DashMap<ModuleKey, CacheEntry>,
}

impl ModuleDataCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Current entry for a key. Never blocks, never triggers a refresh.
    #[must_use]
    pub fn get(&self, key: &ModuleKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Apply a successful refresh result if it is newer than what's cached.
    ///
    /// Returns `true` when the payload landed; `false` is the silent
    /// stale-apply rejection (not an error). A landed success resets the
    /// consecutive-failure counter.
    pub fn apply_if_newer(&self, key: &ModuleKey, stamp: u64, payload: Value) -> bool {
        let mut entry = self.entries.entry(key.clone()).or_insert(CacheEntry {
            payload: None,
            stamp: 0,
            status: RefreshStatus::Success,
            consecutive_failures: 0,
        });

        if entry.payload.is_some() && stamp <= entry.stamp {
            return false;
        }

        entry.payload = Some(payload);
        entry.stamp = stamp;
        entry.status = RefreshStatus::Success;
        entry.consecutive_failures = 0;
        true
    }

    /// Record a failed attempt. The payload and stamp are left untouched.
    ///
    /// Returns the new consecutive-failure count.
    pub fn record_failure(&self, key: &ModuleKey) -> u32 {
        let mut entry = self.entries.entry(key.clone()).or_insert(CacheEntry {
            payload: None,
            stamp: 0,
            status: RefreshStatus::Failed,
            consecutive_failures: 0,
        });
        entry.status = RefreshStatus::Failed;
        entry.consecutive_failures += 1;
        entry.consecutive_failures
    }

    /// Drop all entries belonging to one module instance.
    pub fn remove_module(&self, module_id: &ModuleId) {
        self.entries.retain(|key, _| &key.module_id != module_id);
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModuleDataCache {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
