//! Session configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`LicenseSession`](crate::LicenseSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Product the license is activated for.
    pub product_name: String,
    /// Base URL of the revocation WebSocket endpoint (e.g. `ws://localhost:8080`).
    pub ws_base_url: String,
    /// `Origin` header sent on the revocation handshake.
    pub origin: Option<String>,
    /// Time between heartbeats (ms).
    pub heartbeat_interval_ms: u64,
    /// Delay before reconnecting an abnormally closed revocation channel (ms).
    pub reconnect_backoff_ms: u64,
    /// Reconnect attempts allowed per revocation channel.
    pub max_reconnects: u32,
    /// How long teardown waits for background tasks to finish (ms).
    pub stop_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            product_name: "Product 2".to_string(),
            ws_base_url: "ws://localhost:8080".to_string(),
            origin: Some("http://localhost".to_string()),
            heartbeat_interval_ms: 10_000,
            reconnect_backoff_ms: 2_000,
            max_reconnects: 1,
            stop_grace_ms: 2_000,
        }
    }
}

impl SessionConfig {
    /// Time between heartbeats.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Delay before a reconnect attempt.
    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Teardown grace period.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}
