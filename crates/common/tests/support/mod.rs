//! Shared fakes and fixtures for registry integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fleetreg_common::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// PKI stand-in that writes the same artifacts easy-rsa would
pub struct FakePki {
    pub keys: KeyStore,
    pub fail_issue: Mutex<HashSet<String>>,
    pub fail_revoke: bool,
}

#[async_trait]
impl PkiTool for FakePki {
    async fn issue(&self, name: &str) -> Result<()> {
        if self.fail_issue.lock().contains(name) {
            return Err(Error::PkiTool {
                operation: "gen-req".to_string(),
                name: name.to_string(),
                detail: "request file already exists".to_string(),
            });
        }
        let cert = self.keys.certificate_path(name);
        let key = self.keys.private_key_path(name);
        std::fs::create_dir_all(cert.parent().unwrap())?;
        std::fs::create_dir_all(key.parent().unwrap())?;
        std::fs::write(cert, format!("CERT {}", name))?;
        std::fs::write(key, format!("KEY {}", name))?;
        Ok(())
    }

    async fn revoke(&self, name: &str) -> Result<()> {
        if self.fail_revoke {
            return Err(Error::PkiTool {
                operation: "revoke".to_string(),
                name: name.to_string(),
                detail: "index.txt locked".to_string(),
            });
        }
        let _ = std::fs::remove_file(self.keys.certificate_path(name));
        Ok(())
    }
}

/// Daemon stand-in; `None` sessions means the management channel is down
#[derive(Default)]
pub struct FakeDaemon {
    pub sessions: Mutex<Option<HashMap<String, LiveSession>>>,
    pub killed: Mutex<Vec<String>>,
}

#[async_trait]
impl SessionControl for FakeDaemon {
    async fn list_sessions(&self) -> Result<HashMap<String, LiveSession>> {
        self.sessions
            .lock()
            .clone()
            .ok_or_else(|| Error::ManagementUnavailable("connection refused".to_string()))
    }

    async fn terminate_session(&self, name: &str) -> Result<SessionTermination> {
        let mut guard = self.sessions.lock();
        let Some(sessions) = guard.as_mut() else {
            return Err(Error::ManagementUnavailable("connection refused".to_string()));
        };
        self.killed.lock().push(name.to_string());
        Ok(match sessions.remove(name) {
            Some(_) => SessionTermination::Terminated,
            None => SessionTermination::NotConnected,
        })
    }
}

pub struct Harness {
    pub _tmp: TempDir,
    pub root: PathBuf,
    pub pki: Arc<FakePki>,
    pub daemon: Arc<FakeDaemon>,
    pub registry: Arc<FleetRegistry>,
    mask: String,
}

pub fn harness_with(mask: &str, fail_revoke: bool) -> Harness {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let keys = KeyStore::new(root.join("pki"));
    std::fs::create_dir_all(keys.root()).unwrap();
    std::fs::write(keys.ca_path(), "CA").unwrap();

    let pki = Arc::new(FakePki {
        keys: keys.clone(),
        fail_issue: Mutex::new(HashSet::new()),
        fail_revoke,
    });
    let daemon = Arc::new(FakeDaemon::default());
    *daemon.sessions.lock() = Some(HashMap::new());

    let registry = registry_over(&root, mask, &pki, &daemon);

    Harness {
        _tmp: tmp,
        root,
        pki,
        daemon,
        registry: Arc::new(registry),
        mask: mask.to_string(),
    }
}

/// A registry over the same OpenVPN root, as another process would build it
pub fn registry_over(
    root: &Path,
    mask: &str,
    pki: &Arc<FakePki>,
    daemon: &Arc<FakeDaemon>,
) -> FleetRegistry {
    FleetRegistry::new(
        NetworkRange::parse("10.0.0.0", mask).unwrap(),
        Endpoint {
            host: "vpn.example.org".to_string(),
            port: 1194,
        },
        ProvisioningStore::new(root.join("ccd")),
        CertificateManager::new(pki.clone(), pki.keys.clone()),
        daemon.clone(),
        CredentialStore::load(root.join("credentials.json")).unwrap(),
        RegistryLock::new(root.join(".fleetreg.lock")),
    )
}

impl Harness {
    /// Independent registry sharing this harness's files and fakes
    pub fn second_registry(&self) -> FleetRegistry {
        registry_over(&self.root, &self.mask, &self.pki, &self.daemon)
    }
}

pub fn harness() -> Harness {
    harness_with("255.255.255.0", false)
}

pub fn session(name: &str, addr: &str) -> LiveSession {
    LiveSession {
        name: name.to_string(),
        real_address: "203.0.113.7:51234".to_string(),
        virtual_address: addr.to_string(),
        bytes_received: 100,
        bytes_sent: 200,
        connected_since: chrono::DateTime::<chrono::Utc>::from_timestamp(1709283600, 0).unwrap(),
    }
}
