//! # gridhub-engine
//!
//! The module refresh scheduling and live-update distribution engine:
//!
//! - [`ModuleDataCache`]: last-known-good store keyed by (instance, size),
//!   monotonic-apply so a late-finishing refresh never overwrites a newer one
//! - [`ConnectionHub`]: viewer ↔ key subscription index with exactly-once
//!   first/last-viewer hooks and best-effort broadcast
//! - [`RefreshExecutor`]: bounded worker pool, single-flight per key,
//!   per-adapter timeouts, discard-at-apply for removed instances
//! - [`RefreshScheduler`]: one ticking driver that decides which keys are due
//! - [`CommandRouter`]: viewer command dispatch with origin-only responses
//! - [`Engine`]: the single context object owning all of the above

#![deny(unsafe_code)]

pub mod cache;
pub mod engine;
pub mod executor;
pub mod hub;
pub mod router;
pub mod scheduler;
pub mod viewer;

pub use cache::{CacheEntry, ModuleDataCache, RefreshStatus};
pub use engine::{Engine, EngineConfig};
pub use executor::{RefreshExecutor, RefreshTask, SubmitOutcome};
pub use hub::ConnectionHub;
pub use router::CommandRouter;
pub use scheduler::RefreshScheduler;
pub use viewer::Viewer;
