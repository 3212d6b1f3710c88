//! The engine context: one object owning registry, cache, hub, executor and
//! scheduler, wired together at construction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gridhub_core::errors::EngineError;
use gridhub_core::ids::ModuleId;
use gridhub_modules::{ArtifactCache, ModuleInstance, ModuleRegistry, SettingsMap};

use crate::cache::ModuleDataCache;
use crate::executor::RefreshExecutor;
use crate::hub::ConnectionHub;
use crate::router::CommandRouter;
use crate::scheduler::RefreshScheduler;

/// Engine tunables. Every field has a sensible default, so a config file
/// only names what it overrides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Scheduler tick in milliseconds.
    pub tick_ms: u64,
    /// Refresh worker pool size.
    pub workers: usize,
    /// Concurrency bound for one adapter's sub-fetch batch.
    pub sub_fetch_limit: usize,
    /// Bound on first/last-viewer hooks, milliseconds.
    pub hook_timeout_ms: u64,
    /// Root directory of the content-addressed artifact cache.
    pub artifact_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            workers: 8,
            sub_fetch_limit: 4,
            hook_timeout_ms: 5000,
            artifact_root: PathBuf::from("cache"),
        }
    }
}

impl EngineConfig {
    /// Scheduler tick as a duration.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Hook timeout as a duration.
    #[must_use]
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }
}

/// The assembled engine. Construction wires the parts; [`Engine::start`]
/// spawns the scheduler loop.
pub struct Engine {
    registry: Arc<ModuleRegistry>,
    cache: Arc<ModuleDataCache>,
    hub: Arc<ConnectionHub>,
    executor: Arc<RefreshExecutor>,
    scheduler: Arc<RefreshScheduler>,
    router: Arc<CommandRouter>,
    artifacts: Arc<ArtifactCache>,
    demand_rx: Mutex<Option<mpsc::Receiver<gridhub_core::size::ModuleKey>>>,
}

impl Engine {
    /// Wire an engine around a composed registry.
    #[must_use]
    pub fn new(registry: ModuleRegistry, config: &EngineConfig) -> Self {
        let registry = Arc::new(registry);
        let cache = Arc::new(ModuleDataCache::new());
        let artifacts = Arc::new(ArtifactCache::new(config.artifact_root.clone()));

        let (demand_tx, demand_rx) = mpsc::channel(256);
        let hub = Arc::new(ConnectionHub::new(
            registry.clone(),
            cache.clone(),
            demand_tx,
            config.hook_timeout(),
        ));
        let executor = Arc::new(RefreshExecutor::new(
            registry.clone(),
            cache.clone(),
            hub.clone(),
            config.workers,
            config.sub_fetch_limit,
            artifacts.clone(),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            registry.clone(),
            hub.clone(),
            executor.clone(),
            cache.clone(),
            config.tick(),
        ));
        let router = Arc::new(CommandRouter::new(registry.clone()));

        Self {
            registry,
            cache,
            hub,
            executor,
            scheduler,
            router,
            artifacts,
            demand_rx: Mutex::new(Some(demand_rx)),
        }
    }

    /// Spawn the scheduler loop. Call at most once.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let demand_rx = self
            .demand_rx
            .lock()
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1);
        info!(instances = self.registry.len(), "engine starting");
        tokio::spawn(self.scheduler.clone().run(demand_rx, cancel))
    }

    /// Activate a module instance.
    pub fn activate_module(
        &self,
        kind: &str,
        id: ModuleId,
        settings: SettingsMap,
    ) -> Result<Arc<ModuleInstance>, EngineError> {
        self.registry.activate(kind, id, settings)
    }

    /// Deactivate a module instance, dropping its cached payloads. Any
    /// refresh still in flight is discarded when it tries to apply.
    pub fn deactivate_module(&self, id: &ModuleId) -> Result<(), EngineError> {
        match self.registry.deactivate(id) {
            Some(_) => {
                self.cache.remove_module(id);
                Ok(())
            }
            None => Err(EngineError::InstanceNotFound { id: id.clone() }),
        }
    }

    /// The live-instance table.
    #[must_use]
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// The last-known-good payload store.
    #[must_use]
    pub fn cache(&self) -> &Arc<ModuleDataCache> {
        &self.cache
    }

    /// The viewer subscription hub.
    #[must_use]
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// The refresh executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<RefreshExecutor> {
        &self.executor
    }

    /// The cadence scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    /// The command router.
    #[must_use]
    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    /// The content-addressed artifact cache.
    #[must_use]
    pub fn artifacts(&self) -> &Arc<ArtifactCache> {
        &self.artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick(), Duration::from_secs(1));
        assert_eq!(config.workers, 8);
        assert_eq!(config.hook_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn config_partial_override_from_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"tick-ms": 250, "workers": 2}"#).unwrap();
        assert_eq!(config.tick(), Duration::from_millis(250));
        assert_eq!(config.workers, 2);
        assert_eq!(config.sub_fetch_limit, 4, "untouched fields keep defaults");
    }

    #[tokio::test]
    async fn deactivate_unknown_instance_fails() {
        let engine = Engine::new(ModuleRegistry::new(), &EngineConfig::default());
        let err = engine
            .deactivate_module(&ModuleId::from("ghost"))
            .unwrap_err();
        assert_matches!(err, EngineError::InstanceNotFound { .. });
    }

    #[tokio::test]
    async fn start_and_cancel() {
        let engine = Engine::new(ModuleRegistry::new(), &EngineConfig::default());
        let cancel = CancellationToken::new();
        let handle = engine.start(cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
