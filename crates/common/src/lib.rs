//! Fleetreg Common Library
//!
//! Registration and session registry engine for a fleet of OpenVPN edge
//! devices: address allocation, certificate lifecycle, device credentials,
//! the self-registration waiting list, the VPN daemon management client and
//! the registry service protocol.

pub mod allocator;
pub mod config;
pub mod credentials;
pub mod error;
pub mod lock;
pub mod mgmt;
pub mod pki;
pub mod reconciler;
pub mod records;
pub mod registry;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use config::FleetConfig;
pub use credentials::CredentialStore;
pub use error::{Error, ErrorKind, ErrorReport, Result};
pub use lock::RegistryLock;
pub use mgmt::{ManagementClient, ManagementEndpoint, SessionControl};
pub use pki::{CertificateManager, EasyRsa, KeyStore, PkiTool};
pub use records::ProvisioningStore;
pub use registry::{Endpoint, FleetRegistry};
pub use service::{RegistryClient, Request, Response};
pub use types::*;

/// Fleetreg version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("/etc/fleetreg/config.toml")
}
