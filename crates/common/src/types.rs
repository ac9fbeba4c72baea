//! Core types for Fleetreg

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::error::ErrorReport;

/// Longest client name accepted; names end up as file names and protocol arguments
pub const MAX_CLIENT_NAME_LEN: usize = 64;

/// Check that a client name is safe to use as a file name, a certificate
/// common name and a management-protocol argument.
pub fn validate_client_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_CLIENT_NAME_LEN {
        return Err(invalid("name is too long"));
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err(invalid("name must not start with '.' or '-'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("only ASCII letters, digits, '.', '_' and '-' are allowed"));
    }
    Ok(())
}

/// Pool of virtual addresses handed out to clients.
///
/// The first host address belongs to the tunnel endpoint itself and is
/// never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRange {
    network: Ipv4Network,
}

impl NetworkRange {
    /// Build a range from a base address and a dotted netmask
    pub fn new(base: Ipv4Addr, mask: Ipv4Addr) -> Result<Self> {
        let network = Ipv4Network::with_netmask(base, mask)
            .map_err(|e| Error::InvalidConfig(format!("invalid network {}/{}: {}", base, mask, e)))?;

        if network.network() != base {
            return Err(Error::InvalidConfig(format!(
                "{}/{} has host bits set",
                base, mask
            )));
        }

        Ok(Self { network })
    }

    /// Parse base address and netmask from their textual forms
    pub fn parse(base: &str, mask: &str) -> Result<Self> {
        let base: Ipv4Addr = base
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid network address: {}", base)))?;
        let mask: Ipv4Addr = mask
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid netmask: {}", mask)))?;
        Self::new(base, mask)
    }

    pub fn base(&self) -> Ipv4Addr {
        self.network.network()
    }

    pub fn mask(&self) -> Ipv4Addr {
        self.network.mask()
    }

    pub fn prefix(&self) -> u8 {
        self.network.prefix()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.network.contains(addr)
    }

    /// All usable host addresses in ascending order
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.network.network());
        let last = u32::from(self.network.broadcast());
        // /31 and /32 have no network or broadcast address to exclude
        let (lo, hi) = if self.network.prefix() >= 31 {
            (first, last)
        } else {
            (first + 1, last - 1)
        };
        (lo..=hi).map(Ipv4Addr::from)
    }

    /// Address reserved for the tunnel endpoint
    pub fn reserved(&self) -> Ipv4Addr {
        // hosts() is never empty: even a /32 yields its own address
        self.hosts().next().unwrap_or_else(|| self.network.network())
    }
}

impl std::fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network.network(), self.network.prefix())
    }
}

/// Durable proof that a client owns an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub name: String,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl ProvisioningRecord {
    const DIRECTIVE: &'static str = "ifconfig-push";

    /// Render the client-config file body
    pub fn to_config_line(&self) -> String {
        format!("{} {} {}\n", Self::DIRECTIVE, self.address, self.netmask)
    }

    /// Parse a client-config file body written by [`to_config_line`](Self::to_config_line)
    pub fn from_config_line(name: &str, content: &str) -> Option<Self> {
        let mut parts = content.split_whitespace();
        let directive = parts.next()?;
        let address = parts.next()?.parse().ok()?;
        let netmask = parts.next()?.parse().ok()?;

        if directive != Self::DIRECTIVE || parts.next().is_some() {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            address,
            netmask,
        })
    }
}

/// Login credential reported by a device.
///
/// Persisted as a `[username, password]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl From<(String, String)> for Credential {
    fn from((username, password): (String, String)) -> Self {
        Self { username, password }
    }
}

impl From<Credential> for (String, String) {
    fn from(c: Credential) -> Self {
        (c.username, c.password)
    }
}

/// A tunnel session as reported by the VPN daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSession {
    pub name: String,
    pub real_address: String,
    pub virtual_address: String,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connected_since: DateTime<Utc>,
}

/// PEM material for one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub ca: String,
    pub certificate: String,
    pub private_key: String,
}

/// Everything a provisioned device needs to bring up its tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionBundle {
    pub host: String,
    pub port: u16,
    pub ca: String,
    pub cert: String,
    pub key: String,
}

impl ConnectionBundle {
    pub fn new(host: impl Into<String>, port: u16, certs: CertificateBundle) -> Self {
        Self {
            host: host.into(),
            port,
            ca: certs.ca,
            cert: certs.certificate,
            key: certs.private_key,
        }
    }
}

/// Static attributes of a provisioned client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningInfo {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// One known client in the fleet view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetEntry {
    pub name: String,
    pub provisioning: Option<ProvisioningInfo>,
    pub registered: bool,
    pub session: Option<LiveSession>,
}

/// Merged read model of provisioned and waiting clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetView {
    /// Address pool, `a.b.c.d/prefix`
    pub network: String,
    /// Addresses still available for provisioning
    pub free_addresses: usize,
    pub clients: Vec<FleetEntry>,
    /// Set when live session data could not be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions_unavailable: Option<ErrorReport>,
}

impl FleetView {
    pub fn get(&self, name: &str) -> Option<&FleetEntry> {
        self.clients.iter().find(|c| c.name == name)
    }
}

/// Registration state of a client name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Unknown,
    Waiting,
    Provisioned,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::Unknown => write!(f, "unknown"),
            RegistrationState::Waiting => write!(f, "waiting"),
            RegistrationState::Provisioned => write!(f, "provisioned"),
        }
    }
}

/// Outcome of a device self-registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Registration {
    /// Queued until an administrator provisions the name
    Pending,
    /// Already provisioned; the bundle is returned whatever happened to the credential
    Provisioned {
        credential_accepted: bool,
        bundle: ConnectionBundle,
    },
}

/// What happened to the live session during removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTermination {
    Terminated,
    NotConnected,
    Failed,
}

/// Per-step outcome of a client removal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalReport {
    pub name: String,
    pub session: SessionTermination,
    pub certificate_revoked: bool,
    pub record_removed: bool,
    pub waiting_entry_discarded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorReport>,
}

impl RemovalReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
