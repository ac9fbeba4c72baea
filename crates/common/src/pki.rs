//! Certificate lifecycle
//!
//! Issuance and revocation are delegated to an external PKI tool behind the
//! [`PkiTool`] trait. Whether a client is certified is derived from the key
//! store on disk: a client is issued iff `issued/<name>.crt` exists.

use crate::types::CertificateBundle;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// External PKI operations
#[async_trait]
pub trait PkiTool: Send + Sync {
    /// Generate and sign a client certificate with common name `name`
    async fn issue(&self, name: &str) -> Result<()>;

    /// Revoke `name` and regenerate the revocation list
    async fn revoke(&self, name: &str) -> Result<()>;
}

/// Key store layout shared by the PKI tool and the VPN daemon
#[derive(Debug, Clone)]
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ca_path(&self) -> PathBuf {
        self.root.join("ca.crt")
    }

    pub fn certificate_path(&self, name: &str) -> PathBuf {
        self.root.join("issued").join(format!("{}.crt", name))
    }

    pub fn private_key_path(&self, name: &str) -> PathBuf {
        self.root.join("private").join(format!("{}.key", name))
    }
}

/// easy-rsa driven in batch mode
#[derive(Debug, Clone)]
pub struct EasyRsa {
    binary: PathBuf,
    keys: KeyStore,
}

impl EasyRsa {
    pub fn new(binary: impl AsRef<Path>, keys: KeyStore) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
            keys,
        }
    }

    /// Run one easy-rsa step; any non-zero exit is a `PkiTool` error
    async fn run(&self, name: &str, args: &[&str], common_name: Option<&str>) -> Result<()> {
        let operation = args.first().copied().unwrap_or_default().to_string();
        let pki_error = |detail: String| Error::PkiTool {
            operation: operation.clone(),
            name: name.to_string(),
            detail,
        };

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env("EASYRSA_BATCH", "1")
            .env("EASYRSA_PKI", self.keys.root());
        if let Some(cn) = common_name {
            cmd.env("EASYRSA_REQ_CN", cn);
        }

        debug!("Running {:?} {}", self.binary, args.join(" "));

        let output = cmd
            .output()
            .await
            .map_err(|e| pki_error(format!("failed to run {:?}: {}", self.binary, e)))?;

        if !output.status.success() {
            return Err(pki_error(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl PkiTool for EasyRsa {
    async fn issue(&self, name: &str) -> Result<()> {
        self.run(name, &["gen-req", name, "nopass"], Some(name)).await?;
        self.run(name, &["sign-req", "client", name], Some(name)).await?;
        Ok(())
    }

    async fn revoke(&self, name: &str) -> Result<()> {
        self.run(name, &["revoke", name], None).await?;
        self.run(name, &["gen-crl"], None).await?;
        Ok(())
    }
}

/// Issue/revoke bookkeeping over a [`PkiTool`] and its key store
#[derive(Clone)]
pub struct CertificateManager {
    tool: Arc<dyn PkiTool>,
    keys: KeyStore,
}

impl CertificateManager {
    pub fn new(tool: Arc<dyn PkiTool>, keys: KeyStore) -> Self {
        Self { tool, keys }
    }

    pub async fn issue(&self, name: &str) -> Result<()> {
        self.tool.issue(name).await?;
        info!("Issued certificate for {}", name);
        Ok(())
    }

    pub async fn revoke(&self, name: &str) -> Result<()> {
        self.tool.revoke(name).await?;
        info!("Revoked certificate for {}", name);
        Ok(())
    }

    pub fn is_issued(&self, name: &str) -> bool {
        self.keys.certificate_path(name).is_file()
    }

    /// CA, certificate and key for `name`
    pub async fn read_bundle(&self, name: &str) -> Result<CertificateBundle> {
        if !self.is_issued(name) {
            return Err(Error::NotIssued(name.to_string()));
        }

        let certificate = tokio::fs::read_to_string(self.keys.certificate_path(name)).await?;
        let private_key = tokio::fs::read_to_string(self.keys.private_key_path(name)).await?;
        let ca = tokio::fs::read_to_string(self.keys.ca_path()).await?;

        Ok(CertificateBundle {
            ca,
            certificate,
            private_key,
        })
    }
}
