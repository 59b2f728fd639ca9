//! # visor-daemon
//!
//! Daemon host for the visor smart-helmet safety companion.
//!
//! Connects to the helmet bridge over TCP, feeds inbound frames to the
//! alert engine, and wires the engine's collaborators to this host:
//! alerts persist as JSON files, notifications and emergency dispatch
//! surface through the structured log.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package visor-daemon
//!
//! # Production
//! VISOR_ENV=production ./visor-daemon /etc/visor/config.toml
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use visor_core::{Collaborators, Engine, VisorConfig};

mod logging;
mod sinks;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("VISOR_ENV").is_ok_and(|v| v == "production");
    logging::init(is_production)?;

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(VisorConfig::default_path, PathBuf::from);
    let config = VisorConfig::load(&config_path)?;
    info!(
        config = %config_path.display(),
        bridge = %config.bridge_addr,
        "starting visor-daemon"
    );

    let (bridge, outbound) = transport::bridge_transport();
    let collaborators = Collaborators {
        alerts: Arc::new(sinks::JsonAlertStore::new(
            sinks::JsonAlertStore::default_data_dir(),
        )),
        notifications: Arc::new(sinks::LogNotificationSink),
        cue: Arc::new(sinks::LogCueSink),
        contact: Arc::new(sinks::LogEmergencyContactSink),
        caller: Arc::new(sinks::LogEmergencyCallSink),
        location: Arc::new(sinks::NoFixLocationSource),
        execution: Arc::new(sinks::NoopExecutionExtension::default()),
        transport: Arc::new(bridge),
    };

    let bridge_addr = config.bridge_addr.clone();
    let (engine, handle) = Engine::new(config, collaborators);
    let engine_task = tokio::spawn(engine.run());
    let bridge_task = tokio::spawn(transport::run_bridge(
        bridge_addr,
        handle.clone(),
        outbound,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    handle.shutdown().await.ok();
    bridge_task.abort();
    engine_task.await.ok();
    Ok(())
}
