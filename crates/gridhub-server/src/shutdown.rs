//! Graceful shutdown coordination.
//!
//! One `CancellationToken` is shared by every long-lived task (the HTTP
//! acceptor, viewer sessions, the engine's scheduler loop). Tasks whose
//! completion matters at exit register their `JoinHandle` here and are
//! awaited, under a bound, by [`ShutdownCoordinator::drain`].

use std::time::Duration;

use futures::future;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default bound on the exit drain before abandoning stuck tasks.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

struct RegisteredTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Shared shutdown signal plus the registry of tasks drained at exit.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<RegisteredTask>>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Get a clone of the cancellation token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register a task to be awaited by [`drain`](Self::drain).
    pub fn register(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push(RegisteredTask { name, handle });
    }

    /// Cancel the token and wait up to `timeout` for every registered task;
    /// tasks still running afterwards are abandoned with a warning.
    pub async fn drain(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        let names: Vec<&str> = tasks.iter().map(|task| task.name).collect();
        info!(?names, timeout_secs = timeout.as_secs(), "draining tasks");

        let joins = future::join_all(tasks.into_iter().map(|task| task.handle));
        if tokio::time::timeout(timeout, joins).await.is_err() {
            warn!("drain timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
