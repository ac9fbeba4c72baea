//! Configuration loading for the CLI
//!
//! The CLI only needs to find the registry service; everything else is the
//! daemon's business. The socket comes from the flag (or its environment
//! variable) and otherwise from the shared configuration file.

use anyhow::{Context, Result};
use clap::Args;
use fleetreg_common::{FleetConfig, RegistryClient};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long, env = "FLEETREG_CONFIG", global = true,
          default_value_os_t = fleetreg_common::default_config_path())]
    pub config: PathBuf,

    /// Registry service socket
    #[arg(short, long, env = "FLEETREG_SOCKET", global = true)]
    pub socket: Option<PathBuf>,
}

impl ConfigArgs {
    /// Load the config file and apply the socket override
    pub fn resolve(&self) -> Result<FleetConfig> {
        let mut config = FleetConfig::load(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;

        if let Some(socket) = &self.socket {
            config.service.socket = socket.clone();
        }

        debug!("Using registry service at {}", config.service.socket.display());
        Ok(config)
    }

    /// Client for the registry service
    pub fn open_client(&self) -> Result<RegistryClient> {
        let config = self.resolve()?;
        Ok(RegistryClient::new(&config.service.socket))
    }
}
