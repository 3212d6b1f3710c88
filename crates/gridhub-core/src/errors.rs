//! Error hierarchy for the Gridhub engine.
//!
//! Two domains, both built on [`thiserror`]:
//!
//! - [`ModuleError`]: failures raised by an adapter (refresh, sub-fetch,
//!   command handling, artifact I/O). Never fatal — the engine logs, keeps
//!   serving the stale cache entry, and moves on.
//! - [`EngineError`]: registry/activation failures surfaced to callers
//!   (unknown adapter kind, duplicate instance, rejected settings).
//!
//! Settings validation failures travel as a structured field→message map,
//! never as a panic or an opaque string.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::ids::ModuleId;
use crate::size::Size;

/// Field name → human-readable message, returned by settings validation.
pub type FieldErrors = HashMap<String, String>;

/// Failure raised by a module adapter.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The refresh call itself failed (remote error, parse error, ...).
    #[error("refresh failed: {message}")]
    Refresh {
        /// What went wrong, in adapter terms.
        message: String,
    },

    /// The refresh call exceeded its configured timeout.
    #[error("refresh timed out after {timeout:?}")]
    Timeout {
        /// The configured per-adapter timeout.
        timeout: Duration,
    },

    /// The adapter does not support the requested display size.
    #[error("unsupported size: {size}")]
    UnsupportedSize {
        /// The rejected size.
        size: Size,
    },

    /// The adapter does not understand the given command.
    #[error("unknown command: {command}")]
    UnknownCommand {
        /// The rejected command name.
        command: String,
    },

    /// Disk I/O failure (artifact cache).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModuleError {
    /// Shorthand for a refresh failure with a message.
    #[must_use]
    pub fn refresh(message: impl Into<String>) -> Self {
        Self::Refresh {
            message: message.into(),
        }
    }
}

/// Registry / activation failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No factory registered for the requested adapter kind.
    #[error("unknown module kind: {kind}")]
    UnknownKind {
        /// The unregistered kind.
        kind: String,
    },

    /// An instance with this ID is already active.
    #[error("module instance already active: {id}")]
    DuplicateInstance {
        /// The conflicting instance ID.
        id: ModuleId,
    },

    /// Settings validation rejected one or more fields.
    #[error("settings validation failed ({} field(s))", errors.len())]
    SettingsRejected {
        /// Field name → message for each rejected field.
        errors: FieldErrors,
    },

    /// The addressed module instance is not active.
    #[error("module instance not found: {id}")]
    InstanceNotFound {
        /// The missing instance ID.
        id: ModuleId,
    },

    /// An adapter failure surfaced during activation.
    #[error(transparent)]
    Module(#[from] ModuleError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
