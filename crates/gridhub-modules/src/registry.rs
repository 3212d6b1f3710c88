//! Explicit adapter registry and live instance table.
//!
//! Factories are registered once at process start (explicit composition, no
//! runtime discovery). Activation validates settings through the factory,
//! builds the adapter, and records a [`ModuleInstance`]; deactivation simply
//! removes it — any refresh still in flight is discarded when its result
//! fails the liveness check at apply time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use gridhub_core::errors::EngineError;
use gridhub_core::ids::ModuleId;
use gridhub_core::size::ModuleKey;

use crate::module::{Module, ModuleFactory};
use crate::settings::SettingsMap;

/// One configured, independently addressable data-source unit.
pub struct ModuleInstance {
    /// Instance identity.
    pub id: ModuleId,
    /// Adapter kind this instance was built from.
    pub kind: String,
    /// Settings fixed at activation.
    pub settings: SettingsMap,
    adapter: Arc<dyn Module>,
}

impl ModuleInstance {
    /// The adapter capability handle.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn Module> {
        &self.adapter
    }

    /// All (instance, size) keys this instance owns.
    #[must_use]
    pub fn keys(&self) -> Vec<ModuleKey> {
        self.adapter
            .sizes()
            .into_iter()
            .map(|size| ModuleKey {
                module_id: self.id.clone(),
                size,
            })
            .collect()
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The adapter handle is a trait object; identify it by kind.
        f.debug_struct("ModuleInstance")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Kind→factory map plus the table of live instances.
pub struct ModuleRegistry {
    factories: HashMap<String, Arc<dyn ModuleFactory>>,
    instances: DashMap<ModuleId, Arc<ModuleInstance>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            instances: DashMap::new(),
        }
    }

    /// Register a factory. Called during composition, before any activation.
    pub fn register_factory(&mut self, factory: Arc<dyn ModuleFactory>) {
        let _ = self.factories.insert(factory.kind().to_owned(), factory);
    }

    /// Registered adapter kinds.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Validate settings for a kind without activating anything.
    pub fn validate_settings(
        &self,
        kind: &str,
        settings: &SettingsMap,
    ) -> Result<Option<gridhub_core::errors::FieldErrors>, EngineError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| EngineError::UnknownKind {
                kind: kind.to_owned(),
            })?;
        Ok(factory.validate_settings(settings))
    }

    /// Activate a new instance: validate, build, record.
    pub fn activate(
        &self,
        kind: &str,
        id: ModuleId,
        settings: SettingsMap,
    ) -> Result<Arc<ModuleInstance>, EngineError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| EngineError::UnknownKind {
                kind: kind.to_owned(),
            })?;

        if self.instances.contains_key(&id) {
            return Err(EngineError::DuplicateInstance { id });
        }

        if let Some(errors) = factory.validate_settings(&settings) {
            return Err(EngineError::SettingsRejected { errors });
        }

        let adapter = factory.build(settings.clone())?;
        let instance = Arc::new(ModuleInstance {
            id: id.clone(),
            kind: kind.to_owned(),
            settings,
            adapter,
        });

        info!(module_id = %id, kind, "module instance activated");
        let _ = self.instances.insert(id, instance.clone());
        Ok(instance)
    }

    /// Deactivate an instance, returning it if it was live.
    pub fn deactivate(&self, id: &ModuleId) -> Option<Arc<ModuleInstance>> {
        let removed = self.instances.remove(id).map(|(_, instance)| instance);
        if removed.is_some() {
            info!(module_id = %id, "module instance deactivated");
        }
        removed
    }

    /// Look up a live instance.
    #[must_use]
    pub fn get(&self, id: &ModuleId) -> Option<Arc<ModuleInstance>> {
        self.instances.get(id).map(|entry| entry.value().clone())
    }

    /// Whether an instance is live. Used for discard-at-apply.
    #[must_use]
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.instances.contains_key(id)
    }

    /// Snapshot of all live instances, for scheduler iteration.
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<ModuleInstance>> {
        self.instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether any instance is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
