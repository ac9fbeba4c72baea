//! Fleet registry
//!
//! Composition root tying together address allocation, certificates,
//! provisioning records, credentials, the waiting list and the live view
//! from the VPN daemon.
//!
//! All mutations (`add_client`, `remove_client`, `self_register`,
//! credential removal) run under the in-process write lock and the
//! cross-process [`RegistryLock`], which closes the window between reading
//! the used-address set and writing the new record. The credential document
//! is re-read once both are held. Reads snapshot the static state before
//! asking the daemon for live sessions.

use crate::allocator;
use crate::config::FleetConfig;
use crate::credentials::CredentialStore;
use crate::error::ErrorReport;
use crate::lock::{LockGuard, RegistryLock};
use crate::mgmt::{ManagementClient, SessionControl};
use crate::pki::{CertificateManager, EasyRsa, KeyStore};
use crate::reconciler::{Reconciler, SelfRegistration};
use crate::records::ProvisioningStore;
use crate::types::*;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Public VPN endpoint advertised to devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// The fleet registration and session registry
pub struct FleetRegistry {
    range: NetworkRange,
    endpoint: Endpoint,
    records: ProvisioningStore,
    certs: CertificateManager,
    sessions: Arc<dyn SessionControl>,
    reconciler: Reconciler,
    lock: RegistryLock,
    /// Guards the credential store and serializes every registry mutation
    credentials: RwLock<CredentialStore>,
}

impl FleetRegistry {
    pub fn new(
        range: NetworkRange,
        endpoint: Endpoint,
        records: ProvisioningStore,
        certs: CertificateManager,
        sessions: Arc<dyn SessionControl>,
        credentials: CredentialStore,
        lock: RegistryLock,
    ) -> Self {
        Self {
            range,
            endpoint,
            records,
            certs,
            sessions,
            reconciler: Reconciler::new(),
            lock,
            credentials: RwLock::new(credentials),
        }
    }

    /// Wire up easy-rsa, the management interface and on-disk stores from `config`
    pub fn from_config(config: &FleetConfig) -> Result<Self> {
        let range = config.network_range()?;
        let host = config
            .endpoint
            .host
            .clone()
            .ok_or_else(|| Error::InvalidConfig("endpoint host is not set".to_string()))?;

        let keys = KeyStore::new(config.pki_dir());
        let tool = Arc::new(EasyRsa::new(&config.pki.easyrsa, keys.clone()));
        let sessions = ManagementClient::new(config.management_endpoint())
            .with_timeout(config.management_timeout());
        let credentials = CredentialStore::load(config.credentials_path())?;

        info!(
            "Fleet registry on {} ({}), management at {}",
            range,
            config.openvpn_dir.display(),
            sessions.endpoint()
        );

        Ok(Self::new(
            range,
            Endpoint {
                host,
                port: config.endpoint.port,
            },
            ProvisioningStore::new(config.ccd_dir()),
            CertificateManager::new(tool, keys),
            Arc::new(sessions),
            credentials,
            RegistryLock::new(config.lock_path()),
        ))
    }

    pub fn network(&self) -> &NetworkRange {
        &self.range
    }

    /// Take both locks and bring the credential store up to date with disk
    async fn lock_for_write(
        &self,
    ) -> Result<(RwLockWriteGuard<'_, CredentialStore>, LockGuard)> {
        let mut credentials = self.credentials.write().await;
        let guard = self.lock.exclusive().await?;
        credentials.reload()?;
        Ok((credentials, guard))
    }

    /// Merged view of provisioned and waiting clients.
    ///
    /// Live session data is best effort: if the daemon cannot be queried the
    /// view is returned without it and says why.
    pub async fn list_fleet(&self) -> Result<FleetView> {
        let (records, waiting) = {
            let _guard = self.credentials.read().await;
            (self.records.list().await?, self.reconciler.waiting_names())
        };

        let (mut sessions, sessions_unavailable) = match self.sessions.list_sessions().await {
            Ok(sessions) => (sessions, None),
            Err(e) => {
                warn!("Listing fleet without live sessions: {}", e);
                (HashMap::new(), Some(ErrorReport::from(&e)))
            }
        };

        let provisioned: HashSet<String> = records.iter().map(|r| r.name.clone()).collect();
        let used: HashSet<_> = records.iter().map(|r| r.address).collect();
        let free_addresses = allocator::free_count(&self.range, &used);
        let mut clients: Vec<FleetEntry> = records
            .into_iter()
            .map(|r| FleetEntry {
                session: sessions.remove(&r.name),
                name: r.name,
                provisioning: Some(ProvisioningInfo {
                    address: r.address,
                    netmask: r.netmask,
                }),
                registered: true,
            })
            .collect();

        clients.extend(
            waiting
                .into_iter()
                .filter(|name| !provisioned.contains(name))
                .map(|name| FleetEntry {
                    name,
                    provisioning: None,
                    registered: false,
                    session: None,
                }),
        );

        Ok(FleetView {
            network: self.range.to_string(),
            free_addresses,
            clients,
            sessions_unavailable,
        })
    }

    /// Provision `name`: allocate an address, issue its certificate, write
    /// its record and adopt any waiting registration.
    ///
    /// Nothing becomes visible unless issuance and the record write both
    /// succeed. A failed issuance is not rolled back inside the PKI.
    pub async fn add_client(&self, name: &str) -> Result<ProvisioningRecord> {
        validate_client_name(name)?;
        let (mut credentials, _lock) = self.lock_for_write().await?;

        if self.records.exists(name).await {
            return Err(Error::DuplicateName(name.to_string()));
        }

        let used: HashSet<_> = self
            .records
            .list()
            .await?
            .into_iter()
            .map(|r| r.address)
            .collect();
        let address = allocator::allocate(&self.range, &used).ok_or_else(|| {
            Error::AddressPoolExhausted {
                network: self.range.to_string(),
            }
        })?;
        debug!("Allocated {} for {}", address, name);

        self.certs.issue(name).await?;

        let record = ProvisioningRecord {
            name: name.to_string(),
            address,
            netmask: self.range.mask(),
        };
        self.records.write(&record).await?;
        info!("Provisioned {} at {}", name, address);

        // The client is provisioned at this point; a failed adoption only
        // means the device has to register again.
        if let Err(e) = self.reconciler.provisioned(name, &mut credentials) {
            warn!("Failed to adopt waiting registration for {}: {}", name, e);
        }

        Ok(record)
    }

    /// Remove `name`: terminate its session, revoke its certificate and
    /// delete its record. Each step is best effort and reported; none
    /// stops the others.
    pub async fn remove_client(&self, name: &str) -> Result<RemovalReport> {
        validate_client_name(name)?;
        let (_credentials, _lock) = self.lock_for_write().await?;

        let has_record = self.records.exists(name).await;
        let issued = self.certs.is_issued(name);
        let waiting_entry_discarded = self.reconciler.discard(name);

        if !has_record && !issued && !waiting_entry_discarded {
            return Err(Error::client_not_found(name));
        }

        let mut report = RemovalReport {
            name: name.to_string(),
            session: SessionTermination::NotConnected,
            certificate_revoked: false,
            record_removed: false,
            waiting_entry_discarded,
            errors: Vec::new(),
        };

        if !has_record && !issued {
            info!("Discarded waiting registration for {}", name);
            return Ok(report);
        }

        report.session = match self.sessions.terminate_session(name).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to terminate session of {}: {}", name, e);
                report.errors.push(ErrorReport::from(&e));
                SessionTermination::Failed
            }
        };

        if issued {
            match self.certs.revoke(name).await {
                Ok(()) => report.certificate_revoked = true,
                Err(e) => {
                    warn!("Failed to revoke certificate of {}: {}", name, e);
                    report.errors.push(ErrorReport::from(&e));
                }
            }
        } else {
            let e = Error::NotIssued(name.to_string());
            warn!("Nothing to revoke for {}: {}", name, e);
            report.errors.push(ErrorReport::from(&e));
        }

        match self.records.remove(name).await {
            Ok(removed) => report.record_removed = removed,
            Err(e) => {
                warn!("Failed to remove client config of {}: {}", name, e);
                report.errors.push(ErrorReport::from(&e));
            }
        }

        info!(
            "Removed {} ({} step error(s))",
            name,
            report.errors.len()
        );
        Ok(report)
    }

    /// Handle a device registering itself.
    ///
    /// Unprovisioned names are parked and reported as pending. Provisioned
    /// names get their connection bundle; the credential update policy
    /// decides separately whether the submitted credential is stored.
    pub async fn self_register(
        &self,
        name: &str,
        username: &str,
        password: &str,
    ) -> Result<Registration> {
        validate_client_name(name)?;
        let (mut credentials, _lock) = self.lock_for_write().await?;

        let provisioned = self.records.exists(name).await;
        let bundle = if provisioned {
            Some(self.read_bundle(name).await?)
        } else {
            None
        };

        let outcome = self.reconciler.self_register(
            name,
            Credential::new(username, password),
            provisioned,
            &mut credentials,
        )?;

        match (outcome, bundle) {
            (SelfRegistration::CredentialUpdated { accepted }, Some(bundle)) => {
                Ok(Registration::Provisioned {
                    credential_accepted: accepted,
                    bundle,
                })
            }
            _ => Ok(Registration::Pending),
        }
    }

    /// Connection material for a provisioned client
    pub async fn get_connection_bundle(&self, name: &str) -> Result<ConnectionBundle> {
        validate_client_name(name)?;
        let _guard = self.credentials.read().await;

        if !self.records.exists(name).await {
            return Err(Error::client_not_found(name));
        }
        self.read_bundle(name).await
    }

    async fn read_bundle(&self, name: &str) -> Result<ConnectionBundle> {
        let certs = self.certs.read_bundle(name).await?;
        Ok(ConnectionBundle::new(
            self.endpoint.host.clone(),
            self.endpoint.port,
            certs,
        ))
    }

    pub async fn get_credential(&self, name: &str) -> Result<Option<Credential>> {
        let mut credentials = self.credentials.write().await;
        let _lock = self.lock.shared().await?;
        credentials.reload()?;
        Ok(credentials.get(name).cloned())
    }

    /// Explicitly forget the stored credential of `name`
    pub async fn remove_credential(&self, name: &str) -> Result<bool> {
        validate_client_name(name)?;
        let (mut credentials, _lock) = self.lock_for_write().await?;
        let removed = credentials.remove(name)?;
        Ok(removed.is_some())
    }

    pub async fn registration_state(&self, name: &str) -> RegistrationState {
        let _guard = self.credentials.read().await;
        let provisioned = self.records.exists(name).await;
        self.reconciler.state_of(name, provisioned)
    }
}
