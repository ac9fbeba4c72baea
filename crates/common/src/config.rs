//! Registry configuration

use crate::mgmt::{ManagementEndpoint, DEFAULT_TIMEOUT};
use crate::types::NetworkRange;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fleet registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// OpenVPN configuration root
    pub openvpn_dir: PathBuf,

    /// Virtual address pool
    pub network: NetworkConfig,

    /// Public endpoint handed to devices
    pub endpoint: EndpointConfig,

    /// Management interface
    pub management: ManagementConfig,

    /// PKI tool
    pub pki: PkiConfig,

    /// Registry service socket
    pub service: ServiceConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            openvpn_dir: PathBuf::from("/etc/openvpn"),
            network: NetworkConfig::default(),
            endpoint: EndpointConfig::default(),
            management: ManagementConfig::default(),
            pki: PkiConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

/// Virtual network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network base address
    pub address: String,

    /// Dotted netmask
    pub netmask: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "172.21.0.0".to_string(),
            netmask: "255.255.0.0".to_string(),
        }
    }
}

/// Endpoint advertised in connection bundles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Host name devices connect to; the machine's host name when unset
    pub host: Option<String>,

    /// VPN UDP port
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 1194,
        }
    }
}

/// Management interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Unix socket path; `<openvpn_dir>/run/mgmt.sock` when unset
    pub socket: Option<PathBuf>,

    /// TCP address (`host:port`); takes precedence over the socket
    pub tcp: Option<String>,

    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            socket: None,
            tcp: None,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

/// PKI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    /// easy-rsa script
    pub easyrsa: PathBuf,

    /// Key store; `<openvpn_dir>/pki` when unset
    pub dir: Option<PathBuf>,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            easyrsa: PathBuf::from("/usr/share/easy-rsa/easyrsa"),
            dir: None,
        }
    }
}

/// Registry service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Unix socket served by `fleetregd`
    pub socket: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/fleetreg/fleetregd.sock"),
        }
    }
}

impl FleetConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parsed address pool
    pub fn network_range(&self) -> Result<NetworkRange> {
        NetworkRange::parse(&self.network.address, &self.network.netmask)
    }

    /// Per-client config directory
    pub fn ccd_dir(&self) -> PathBuf {
        self.openvpn_dir.join("ccd")
    }

    /// Key store root
    pub fn pki_dir(&self) -> PathBuf {
        self.pki
            .dir
            .clone()
            .unwrap_or_else(|| self.openvpn_dir.join("pki"))
    }

    /// Credential document
    pub fn credentials_path(&self) -> PathBuf {
        self.openvpn_dir.join("credentials.json")
    }

    /// Lock file serializing registry mutations across processes
    pub fn lock_path(&self) -> PathBuf {
        self.openvpn_dir.join(".fleetreg.lock")
    }

    pub fn management_endpoint(&self) -> ManagementEndpoint {
        match &self.management.tcp {
            Some(addr) => ManagementEndpoint::Tcp(addr.clone()),
            None => ManagementEndpoint::Unix(
                self.management
                    .socket
                    .clone()
                    .unwrap_or_else(|| self.openvpn_dir.join("run").join("mgmt.sock")),
            ),
        }
    }

    pub fn management_timeout(&self) -> Duration {
        Duration::from_millis(self.management.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_and_derived_paths() {
        let config = FleetConfig::default();
        assert_eq!(config.ccd_dir(), PathBuf::from("/etc/openvpn/ccd"));
        assert_eq!(config.pki_dir(), PathBuf::from("/etc/openvpn/pki"));
        assert_eq!(
            config.credentials_path(),
            PathBuf::from("/etc/openvpn/credentials.json")
        );
        assert_eq!(
            config.management_endpoint(),
            ManagementEndpoint::Unix(PathBuf::from("/etc/openvpn/run/mgmt.sock"))
        );
        assert_eq!(config.network_range().unwrap().to_string(), "172.21.0.0/16");
        assert_eq!(config.management_timeout(), Duration::from_secs(5));
        assert_eq!(config.lock_path(), PathBuf::from("/etc/openvpn/.fleetreg.lock"));
        assert_eq!(
            config.service.socket,
            PathBuf::from("/run/fleetreg/fleetregd.sock")
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fleet.toml");
        std::fs::write(
            &path,
            "openvpn_dir = \"/srv/ovpn\"\n[network]\naddress = \"10.0.0.0\"\nnetmask = \"255.255.255.0\"\n[management]\ntcp = \"127.0.0.1:7505\"\n",
        )
        .unwrap();

        let config = FleetConfig::load(&path).unwrap();
        assert_eq!(config.ccd_dir(), PathBuf::from("/srv/ovpn/ccd"));
        assert_eq!(config.endpoint.port, 1194);
        assert_eq!(config.network_range().unwrap().to_string(), "10.0.0.0/24");
        assert_eq!(
            config.management_endpoint(),
            ManagementEndpoint::Tcp("127.0.0.1:7505".to_string())
        );
    }

    #[test]
    fn test_save_load_and_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("conf/fleet.toml");
        assert_eq!(FleetConfig::load(&path).unwrap().endpoint.port, 1194);

        let mut config = FleetConfig::default();
        config.endpoint.host = Some("vpn.example.org".to_string());
        config.save(&path).unwrap();

        let loaded = FleetConfig::load(&path).unwrap();
        assert_eq!(loaded.endpoint.host.as_deref(), Some("vpn.example.org"));
    }

    #[test]
    fn test_invalid_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fleet.toml");
        std::fs::write(&path, "network = 3").unwrap();
        assert!(matches!(FleetConfig::load(&path), Err(Error::InvalidConfig(_))));
    }
}
