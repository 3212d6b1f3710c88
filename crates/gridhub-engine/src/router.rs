//! Viewer command dispatch.
//!
//! A command addresses one module instance by ID; the adapter's handler runs
//! inline on the connection's task (commands are interactive, not scheduled
//! work). Whatever comes back — a response payload or an error — goes to the
//! originating connection only, never to other viewers of the same key.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use gridhub_core::ids::ModuleId;
use gridhub_core::wire::ServerMessage;
use gridhub_modules::ModuleRegistry;

use crate::viewer::Viewer;

/// Looks up the addressed instance and dispatches the command.
pub struct CommandRouter {
    registry: Arc<ModuleRegistry>,
}

impl CommandRouter {
    /// Create a router over the live-instance table.
    #[must_use]
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    /// Dispatch one command from a viewer.
    ///
    /// The origin receives a command-response when the handler returns a
    /// payload, nothing when it returns `Ok(None)`, and an error envelope
    /// when the instance is missing or the handler fails.
    pub async fn dispatch(
        &self,
        module_id: &ModuleId,
        command: &str,
        payload: Value,
        origin: &Viewer,
    ) {
        let Some(instance) = self.registry.get(module_id) else {
            warn!(%module_id, command, "command for unknown module instance");
            let _ = origin.send_message(&ServerMessage::error(format!(
                "unknown module instance: {module_id}"
            )));
            return;
        };

        debug!(%module_id, command, conn = %origin.id, "dispatching command");

        match instance.adapter().handle_command(command, payload).await {
            Ok(Some(response)) => {
                let _ = origin
                    .send_message(&ServerMessage::command_response(module_id.clone(), response));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%module_id, command, error = %e, "command failed");
                let _ = origin.send_message(&ServerMessage::error(format!(
                    "command {command} failed: {e}"
                )));
            }
        }
    }
}
