//! License session lifecycle for Keylease.
//!
//! A [`LicenseSession`] activates a license key against the license server,
//! keeps it alive with periodic heartbeats and listens for server-initiated
//! revocation.
//!
//! # Components
//!
//! - **HeartbeatScheduler**: cancellable periodic task calling the server's
//!   heartbeat endpoint while the session is `Active`
//! - **RevocationChannel**: WebSocket that delivers `LOCK` notifications,
//!   reconnecting once after an abnormal close
//! - **LicenseSession**: the state machine that owns both and serializes
//!   every transition
//!
//! # Concurrency
//!
//! Three contexts touch a session: the caller of `activate`/`deactivate`,
//! the heartbeat task and the revocation receive task. Transitions are made
//! under one mutex that is never held across network I/O. A lock arriving on
//! the revocation task stops the heartbeat and detaches the channel without
//! joining either, so the receive task never waits on itself.
//!
//! # Example
//!
//! ```no_run
//! use keylease_license::{HardwareDeviceId, HttpTransport, HttpTransportConfig};
//! use keylease_session::{LicenseSession, LogTerminator, NoopObserver, SessionConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), keylease_license::LicenseError> {
//! let transport = HttpTransport::new(HttpTransportConfig::default())?;
//! let session = LicenseSession::new(
//!     SessionConfig::default(),
//!     Arc::new(transport),
//!     Arc::new(HardwareDeviceId),
//!     Arc::new(NoopObserver),
//!     Arc::new(LogTerminator),
//! );
//!
//! session.activate("LIC-1").await?;
//! // ...
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod heartbeat;
mod observer;
mod revocation;
mod session;

pub use config::SessionConfig;
pub use heartbeat::{HeartbeatScheduler, HeartbeatStats};
pub use observer::{LogTerminator, NoopObserver, SessionObserver, Terminator};
pub use revocation::{
    revocation_endpoint, ChannelConfig, ChannelState, LockHandler, RevocationChannel,
};
pub use session::LicenseSession;

pub use keylease_license::{LicenseError, LicenseResult, LockNotification, SessionState};
