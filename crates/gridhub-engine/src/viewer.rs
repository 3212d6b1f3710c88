//! Transport-neutral viewer connection handle.
//!
//! The websocket layer owns the socket; the engine only sees this handle —
//! an ID plus a bounded outbound queue. Sends are non-blocking: a full or
//! closed queue reports failure and the hub decides whether to drop the
//! viewer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use gridhub_core::ids::ConnectionId;
use gridhub_core::wire::ServerMessage;

/// One live viewer connection.
pub struct Viewer {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Outbound queue consumed by the connection's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this viewer connected.
    connected_at: Instant,
    /// Whether the viewer has responded since the last liveness check.
    is_alive: AtomicBool,
    /// When the last pong (or any activity) was seen.
    last_pong: Mutex<Instant>,
    /// Messages dropped because the queue was full or closed.
    dropped: AtomicU64,
}

impl Viewer {
    /// Create a viewer handle around an outbound queue.
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a pre-serialized frame.
    ///
    /// Returns `false` (and counts a drop) when the queue is full or the
    /// connection's write task is gone.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and enqueue a server message.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Messages dropped so far for this viewer.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Mark the viewer alive (pong or message received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag; `true` if alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong (or connection establishment).
    #[must_use]
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
