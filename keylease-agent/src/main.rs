//! Keylease license agent
//!
//! Activates a license key for this device, keeps it alive with heartbeats
//! and exits as soon as the server revokes it.
//!
//! Usage:
//!   keylease-agent LIC-XXXX --api-url https://license.example.com/api/license
//!
//! Ctrl-C deactivates the license before exiting.

use std::{path::PathBuf, process::ExitCode, sync::Arc};
use anyhow::{Context, Result};
use clap::Parser;
use keylease_agent::{
    init_tracing, AgentConfig, ChannelTerminator, ConsoleObserver, Overrides, EXIT_LOCKED,
};
use keylease_license::{DeviceInfo, HttpTransport};
use keylease_session::LicenseSession;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "keylease-agent")]
#[command(about = "Keylease license activation agent")]
struct Args {
    /// License key to activate
    #[arg(env = "KEYLEASE_LICENSE_KEY")]
    license_key: String,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// License API base URL
    #[arg(long, env = "KEYLEASE_API_URL")]
    api_url: Option<String>,

    /// Revocation WebSocket base URL
    #[arg(long, env = "KEYLEASE_WS_URL")]
    ws_url: Option<String>,

    /// Product name sent on activation
    #[arg(long)]
    product: Option<String>,

    /// Use this device id instead of the hardware address
    #[arg(long)]
    device_id: Option<String>,

    /// Seconds between heartbeats
    #[arg(long)]
    heartbeat_secs: Option<u64>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            api_url: self.api_url.clone(),
            ws_url: self.ws_url.clone(),
            product: self.product.clone(),
            device_id: self.device_id.clone(),
            heartbeat_secs: self.heartbeat_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    info!("Keylease agent starting...");
    let mut config = AgentConfig::load_or_default(args.config.as_deref())?;
    config.apply_overrides(&args.overrides());

    let device = DeviceInfo::collect();
    info!(
        "Device: {} ({} {}, {})",
        device.hostname, device.os_name, device.os_version, device.arch
    );

    let transport =
        HttpTransport::new(config.transport.clone()).context("Failed to build HTTP client")?;
    let (terminator, mut terminated) = ChannelTerminator::channel();
    let session = LicenseSession::new(
        config.session.clone(),
        Arc::new(transport),
        config.device_provider(),
        Arc::new(ConsoleObserver),
        Arc::new(terminator),
    );

    if let Err(e) = session.activate(&args.license_key).await {
        error!("Activation failed: {}", e);
        eprintln!("Activation failed: {e}");
        return Ok(ExitCode::FAILURE);
    }

    if let Some(identity) = session.identity() {
        println!("\n========================================");
        println!("  Keylease License Active");
        println!("========================================");
        println!("  License:  {}", identity.masked_key());
        println!("  Device:   {}", identity.device_id());
        println!("  Product:  {}", identity.product_name());
        println!("  Server:   {}", config.transport.api_base_url);
        println!("========================================\n");
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, releasing license");
            session.shutdown().await;
            Ok(ExitCode::SUCCESS)
        }
        reason = terminated.recv() => {
            info!(
                "Exiting: {}",
                reason.as_deref().unwrap_or("session terminated")
            );
            Ok(ExitCode::from(EXIT_LOCKED))
        }
    }
}
