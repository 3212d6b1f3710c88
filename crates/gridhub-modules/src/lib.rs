//! # gridhub-modules
//!
//! The adapter side of Gridhub:
//!
//! - [`Module`]: the capability contract every data-source adapter implements
//!   (sizes, per-size refresh cadence, refresh, viewer hooks, commands)
//! - [`ModuleFactory`] + [`ModuleRegistry`]: explicit kind→factory map
//!   composed at process start — no runtime discovery
//! - [`FetchScope`]: bounded, scoped sub-fetch batch for adapters that need
//!   several remote resources per refresh
//! - [`ArtifactCache`]: content-addressed on-disk store for derived artifacts

#![deny(unsafe_code)]

pub mod artifacts;
pub mod fetch_scope;
pub mod module;
pub mod registry;
pub mod settings;

pub use artifacts::ArtifactCache;
pub use fetch_scope::FetchScope;
pub use module::{Module, ModuleFactory, RefreshContext};
pub use registry::{ModuleInstance, ModuleRegistry};
pub use settings::SettingsMap;
