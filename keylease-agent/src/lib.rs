//! Wiring for the Keylease command-line agent: configuration, logging and
//! the presentation/exit seams of the license session.

use anyhow::{Context, Result};
use keylease_license::{
    DeviceIdProvider, FixedDeviceId, HardwareDeviceId, HttpTransportConfig, SessionState,
};
use keylease_session::{SessionConfig, SessionObserver, Terminator};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exit status used when the server revokes the license.
pub const EXIT_LOCKED: u8 = 3;

/// Agent configuration, as read from the JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// License API settings.
    pub transport: HttpTransportConfig,
    /// Session and revocation channel settings.
    pub session: SessionConfig,
    /// Use this device id instead of the hardware address.
    pub device_id_override: Option<String>,
}

/// Values given on the command line, taking precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub product: Option<String>,
    pub device_id: Option<String>,
    pub heartbeat_secs: Option<u64>,
}

impl AgentConfig {
    /// Reads a config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Reads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                info!("Loading config from {:?}", path);
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Applies command-line overrides.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = &overrides.api_url {
            self.transport.api_base_url.clone_from(url);
        }
        if let Some(url) = &overrides.ws_url {
            self.session.ws_base_url.clone_from(url);
        }
        if let Some(product) = &overrides.product {
            self.session.product_name.clone_from(product);
        }
        if let Some(device_id) = &overrides.device_id {
            self.device_id_override = Some(device_id.clone());
        }
        if let Some(secs) = overrides.heartbeat_secs {
            self.session.heartbeat_interval_ms = secs.saturating_mul(1000);
        }
    }

    /// The device id source: the override if configured, else hardware.
    pub fn device_provider(&self) -> Arc<dyn DeviceIdProvider> {
        match &self.device_id_override {
            Some(id) => Arc::new(FixedDeviceId::new(id.clone())),
            None => Arc::new(HardwareDeviceId),
        }
    }
}

/// Reports session events on the console.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_state_changed(&self, state: SessionState) {
        match state {
            SessionState::Active => info!("License is active"),
            SessionState::Inactive => info!("License is inactive"),
            SessionState::Locked => warn!("License is locked"),
            other => info!("License state: {}", other),
        }
    }

    fn on_locked(&self, reason: &str) {
        error!("License locked by server: {}", reason);
        eprintln!("\n========================================");
        eprintln!("  LICENSE LOCKED");
        eprintln!("========================================");
        eprintln!("  {reason}");
        eprintln!("========================================\n");
    }
}

/// Hands the termination request to the main task, which exits.
#[derive(Debug, Clone)]
pub struct ChannelTerminator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTerminator {
    /// Returns the terminator and the receiver `main` waits on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Terminator for ChannelTerminator {
    fn terminate(&self, reason: &str) {
        if self.tx.send(reason.to_string()).is_err() {
            warn!("Exit requested after main loop ended: {}", reason);
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
