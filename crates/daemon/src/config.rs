//! Daemon configuration
//!
//! File values are loaded first, then overridden by flags or their
//! environment variables. The advertised host falls back to the machine's
//! host name.

use anyhow::{Context, Result};
use clap::Args;
use fleetreg_common::FleetConfig;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long, env = "FLEETREG_CONFIG",
          default_value_os_t = fleetreg_common::default_config_path())]
    pub config: PathBuf,

    /// OpenVPN configuration root
    #[arg(long, env = "OVPN_DIR")]
    pub openvpn_dir: Option<PathBuf>,

    /// Virtual network base address
    #[arg(long, env = "OVPN_NETWORK")]
    pub network: Option<String>,

    /// Virtual network netmask
    #[arg(long, env = "OVPN_NETMASK")]
    pub netmask: Option<String>,

    /// VPN UDP port advertised to devices
    #[arg(long, env = "OVPN_UDP_PORT")]
    pub port: Option<u16>,

    /// Host name advertised to devices
    #[arg(long, env = "FQDN")]
    pub host: Option<String>,

    /// Management interface Unix socket
    #[arg(long, env = "OVPN_MGMT_SOCKET")]
    pub mgmt_socket: Option<PathBuf>,

    /// Management interface TCP address (host:port)
    #[arg(long, env = "OVPN_MGMT_TCP")]
    pub mgmt_tcp: Option<String>,

    /// Management call timeout in milliseconds
    #[arg(long, env = "OVPN_MGMT_TIMEOUT_MS")]
    pub mgmt_timeout_ms: Option<u64>,

    /// easy-rsa script path
    #[arg(long, env = "EASYRSA")]
    pub easyrsa: Option<PathBuf>,

    /// Registry service socket
    #[arg(long, env = "FLEETREG_SOCKET")]
    pub socket: Option<PathBuf>,
}

impl ConfigArgs {
    /// Load the config file and apply overrides
    pub fn resolve(&self) -> Result<FleetConfig> {
        let mut config = FleetConfig::load(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;

        if let Some(dir) = &self.openvpn_dir {
            config.openvpn_dir = dir.clone();
        }
        if let Some(network) = &self.network {
            config.network.address = network.clone();
        }
        if let Some(netmask) = &self.netmask {
            config.network.netmask = netmask.clone();
        }
        if let Some(port) = self.port {
            config.endpoint.port = port;
        }
        if let Some(host) = &self.host {
            config.endpoint.host = Some(host.clone());
        }
        if let Some(socket) = &self.mgmt_socket {
            config.management.socket = Some(socket.clone());
        }
        if let Some(tcp) = &self.mgmt_tcp {
            config.management.tcp = Some(tcp.clone());
        }
        if let Some(timeout) = self.mgmt_timeout_ms {
            config.management.timeout_ms = timeout;
        }
        if let Some(easyrsa) = &self.easyrsa {
            config.pki.easyrsa = easyrsa.clone();
        }
        if let Some(socket) = &self.socket {
            config.service.socket = socket.clone();
        }

        if config.endpoint.host.is_none() {
            let host = hostname::get().context("resolving local host name")?;
            config.endpoint.host = Some(host.to_string_lossy().into_owned());
        }

        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ConfigArgs,
    }

    #[test]
    fn test_flags_override_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "openvpn_dir = \"/srv/ovpn\"\n[endpoint]\nhost = \"vpn.example.org\"\nport = 1195\n",
        )
        .unwrap();

        let cli = TestCli::parse_from([
            "fleetregd",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "443",
            "--socket",
            "/tmp/fleetregd.sock",
        ]);
        let config = cli.config.resolve().unwrap();

        assert_eq!(config.openvpn_dir, PathBuf::from("/srv/ovpn"));
        assert_eq!(config.endpoint.host.as_deref(), Some("vpn.example.org"));
        assert_eq!(config.endpoint.port, 443);
        assert_eq!(config.service.socket, PathBuf::from("/tmp/fleetregd.sock"));
    }
}
