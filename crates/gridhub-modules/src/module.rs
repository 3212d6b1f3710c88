//! The adapter capability contract.
//!
//! A *module* is one kind of data source (a media server, a torrent client,
//! a system monitor). The core never sees its business logic — only this
//! trait. Cadence is declared per display size; `Duration::ZERO` means
//! "never poll" (push-only or refresh-once-on-demand).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use gridhub_core::errors::{FieldErrors, ModuleError};
use gridhub_core::size::Size;

use crate::artifacts::ArtifactCache;
use crate::fetch_scope::FetchScope;
use crate::settings::SettingsMap;

/// Default bound on one adapter refresh call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-refresh facilities handed to the adapter by the executor.
///
/// Scoped to one refresh call: the sub-fetch scope is bounded and fully
/// drained before the call returns; the artifact cache outlives the call but
/// is shared and content-addressed, so concurrent use is safe.
pub struct RefreshContext {
    /// Bounded concurrent sub-fetch facility for this refresh.
    pub scope: FetchScope,
    /// Content-addressed store for derived artifacts.
    pub artifacts: Arc<ArtifactCache>,
}

/// Capability contract implemented by every data-source adapter.
#[async_trait]
pub trait Module: Send + Sync {
    /// Stable adapter-kind identifier (e.g. `"plex"`).
    fn kind(&self) -> &'static str;

    /// Human-readable name used in logs and viewer chrome.
    fn display_name(&self) -> &str {
        self.kind()
    }

    /// The ordered set of display sizes this adapter supports.
    fn sizes(&self) -> Vec<Size>;

    /// Refresh cadence for one size. `Duration::ZERO` means never poll.
    fn refresh_interval(&self, size: &Size) -> Duration;

    /// Cadence of the viewer-independent background refresh.
    /// `Duration::ZERO` (the default) means none.
    fn background_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Upper bound on one `refresh` call; exceeding it counts as a failure.
    fn refresh_timeout(&self) -> Duration {
        DEFAULT_REFRESH_TIMEOUT
    }

    /// Produce a fresh payload for one display size.
    ///
    /// May use `ctx.scope` for bounded parallel sub-fetches and
    /// `ctx.artifacts` to memoize derived artifacts. Must not assume any
    /// particular executor thread; runs on a shared worker pool.
    async fn refresh(&self, size: &Size, ctx: &RefreshContext) -> Result<Value, ModuleError>;

    /// Called when a key of this instance gains its first viewer.
    /// Best-effort and idempotent; failures are logged and ignored.
    async fn on_first_viewer(&self) {}

    /// Called when a key of this instance loses its last viewer.
    /// Best-effort, idempotent.
    async fn on_last_viewer(&self) {}

    /// Handle a viewer command. `Ok(None)` means "handled, nothing to say";
    /// the response, if any, goes back to the originating connection only.
    async fn handle_command(
        &self,
        command: &str,
        payload: Value,
    ) -> Result<Option<Value>, ModuleError> {
        let _ = payload;
        Err(ModuleError::UnknownCommand {
            command: command.to_owned(),
        })
    }
}

/// Builds adapters of one kind; registered explicitly at process start.
pub trait ModuleFactory: Send + Sync {
    /// The adapter kind this factory builds.
    fn kind(&self) -> &'static str;

    /// Validate settings before activation.
    ///
    /// Returns `None` when the settings are acceptable, otherwise a
    /// field→message map. Never returns an `Err`-style failure — validation
    /// problems are data, not exceptions.
    fn validate_settings(&self, settings: &SettingsMap) -> Option<FieldErrors>;

    /// Build an adapter from validated settings.
    fn build(&self, settings: SettingsMap) -> Result<Arc<dyn Module>, ModuleError>;
}
