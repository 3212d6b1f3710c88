//! Scoped, bounded concurrent sub-fetch batches.
//!
//! One adapter refresh often needs several remote resources (thumbnails,
//! per-item detail calls). [`FetchScope`] runs such a batch with a
//! concurrency bound that is independent of the global worker pool, and the
//! batch is fully settled before the call returns — there is no detached
//! work to leak on any exit path. Each item fails independently: a failed
//! sub-fetch degrades to its fallback value instead of aborting the refresh.

use futures::stream::{self, StreamExt};
use std::future::Future;

use gridhub_core::errors::ModuleError;

/// Bounded concurrent batch facility for one refresh call.
#[derive(Clone, Copy, Debug)]
pub struct FetchScope {
    limit: usize,
}

impl FetchScope {
    /// Create a scope with the given concurrency limit (clamped to ≥ 1).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// The concurrency limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run a batch of sub-fetches, at most `limit` in flight at once.
    ///
    /// Results come back in submission order; each item's failure is its own
    /// `Err`, never the batch's.
    pub async fn run_all<T, F>(&self, futures: Vec<F>) -> Vec<Result<T, ModuleError>>
    where
        F: Future<Output = Result<T, ModuleError>>,
    {
        stream::iter(futures).buffered(self.limit).collect().await
    }

    /// Run a batch where every failure degrades to a fallback value.
    ///
    /// This is the soft-fail path adapters normally want: one missing
    /// thumbnail yields an empty slot, not a failed refresh.
    pub async fn run_soft<T, F>(
        &self,
        futures: Vec<F>,
        fallback: impl Fn(ModuleError) -> T,
    ) -> Vec<T>
    where
        F: Future<Output = Result<T, ModuleError>>,
    {
        self.run_all(futures)
            .await
            .into_iter()
            .map(|r| r.unwrap_or_else(&fallback))
            .collect()
    }
}
