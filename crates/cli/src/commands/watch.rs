//! Watch Command

use anyhow::Result;
use clap::Args;
use fleetreg_common::RegistryClient;
use std::time::Duration;
use tracing::{info, warn};

use super::client;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct WatchArgs {
    /// Refresh interval in seconds
    #[arg(short, long, default_value = "10")]
    pub interval: u64,
}

pub async fn execute(service: &RegistryClient, args: WatchArgs, format: OutputFormat) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                println!("== {} ==", timestamp());
                if let Err(e) = client::list(service, format).await {
                    warn!("Failed to read fleet: {:#}", e);
                }
            }
        }
    }

    Ok(())
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
