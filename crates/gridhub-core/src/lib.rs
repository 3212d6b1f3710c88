//! # gridhub-core
//!
//! Shared vocabulary that all other Gridhub crates depend on:
//!
//! - **Branded IDs**: [`ModuleId`], [`ConnectionId`] as newtypes for type safety
//! - **Sizes**: [`Size`] display-size variants and the [`ModuleKey`] cache/subscription key
//! - **Errors**: [`ModuleError`] / [`EngineError`] hierarchy via `thiserror`
//! - **Wire envelope**: [`ClientMessage`] / [`ServerMessage`] live-update protocol

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod size;
pub mod wire;

pub use errors::{EngineError, ModuleError};
pub use ids::{ConnectionId, ModuleId};
pub use size::{ModuleKey, Size};
pub use wire::{ClientMessage, ServerMessage};
