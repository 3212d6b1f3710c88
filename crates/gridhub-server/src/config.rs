//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Gridhub server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent viewer connections.
    pub max_connections: usize,
    /// Interval between server-initiated ping frames, seconds.
    pub ping_interval_secs: u64,
    /// Close the connection after this long without a pong, seconds.
    pub pong_timeout_secs: u64,
    /// Per-viewer outbound queue depth; a full queue drops frames.
    pub send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 50,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            send_queue: 64,
        }
    }
}

impl ServerConfig {
    /// Ping interval as a duration.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong deadline as a duration.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}
