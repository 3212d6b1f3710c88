//! Live-update wire envelope (viewer ↔ core).
//!
//! JSON messages tagged by `type`, camelCase fields. Client→server messages
//! manage subscriptions and send module commands; server→client messages
//! carry refreshed payloads and command responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ModuleId;
use crate::size::{ModuleKey, Size};

/// Message received from a viewer connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Start watching a (module instance, size) pair.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// The module instance to watch.
        module_id: ModuleId,
        /// The display size to watch it at.
        size: Size,
    },

    /// Stop watching a (module instance, size) pair.
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// The module instance.
        module_id: ModuleId,
        /// The display size.
        size: Size,
    },

    /// Invoke a command on a module instance.
    #[serde(rename_all = "camelCase")]
    Command {
        /// The addressed module instance.
        module_id: ModuleId,
        /// Command name, adapter-defined.
        command: String,
        /// Opaque command payload.
        #[serde(default)]
        payload: Value,
    },
}

/// Message pushed to a viewer connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// A refreshed payload for a subscribed key.
    #[serde(rename_all = "camelCase")]
    DataUpdate {
        /// The module instance that produced the payload.
        module_id: ModuleId,
        /// The display size the payload was produced for.
        size: Size,
        /// Opaque adapter-produced value.
        payload: Value,
        /// RFC-3339 send time.
        timestamp: String,
    },

    /// Response to a command, delivered to the originating connection only.
    #[serde(rename_all = "camelCase")]
    CommandResponse {
        /// The module instance that handled the command.
        module_id: ModuleId,
        /// Opaque response value.
        payload: Value,
    },

    /// An error surfaced to the viewer (bad message, unknown module, ...).
    Error {
        /// Human-readable message.
        message: String,
    },
}

impl ServerMessage {
    /// Build a data-update for a key with the current UTC timestamp.
    #[must_use]
    pub fn data_update(key: &ModuleKey, payload: Value) -> Self {
        Self::DataUpdate {
            module_id: key.module_id.clone(),
            size: key.size.clone(),
            payload,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Build a command response addressed to the origin connection.
    #[must_use]
    pub fn command_response(module_id: ModuleId, payload: Value) -> Self {
        Self::CommandResponse { module_id, payload }
    }

    /// Build an error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
