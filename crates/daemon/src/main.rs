//! Fleetreg Daemon
//!
//! Hosts the fleet registry in one resident process so self-registrations
//! parked in the waiting list outlive the request that parked them. The
//! `fleetctl` CLI and device-facing front ends talk to it over a Unix
//! socket.

use clap::Parser;
use fleetreg_common::{service, FleetRegistry};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod socket;

#[derive(Parser)]
#[command(name = "fleetregd")]
#[command(about = "Fleetreg daemon - OpenVPN fleet registration service")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: config::ConfigArgs,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Fleetreg daemon v{}", fleetreg_common::VERSION);

    let config = cli.config.resolve()?;
    let registry = Arc::new(FleetRegistry::from_config(&config)?);

    let socket_path = config.service.socket.clone();
    let listener = socket::bind(&socket_path)?;
    let server = tokio::spawn(service::serve(listener, registry));

    info!("Registry service listening on {}", socket_path.display());

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server => {
            match result {
                Ok(Err(e)) => tracing::error!("Registry service error: {}", e),
                Err(e) => tracing::error!("Registry service task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    socket::cleanup(&socket_path);
    info!("Daemon shutdown complete");
    Ok(())
}
