//! Registration reconciliation
//!
//! Devices may self-register before an administrator has provisioned them.
//! Such early registrations are parked in an in-memory waiting list and
//! moved into the credential store once the name is provisioned.
//!
//! Per-name states: `Unknown -> Waiting -> Provisioned`. There is no way back
//! from `Provisioned`; removing a client is the registry's business.
//!
//! The waiting list lives only as long as the process. A restart empties it
//! and devices whose registration was parked have to register again.

use crate::credentials::CredentialStore;
use crate::types::{Credential, RegistrationState};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Effect of a self-registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfRegistration {
    /// Parked in the waiting list
    Queued { replaced: bool },
    /// Name already provisioned; credential update attempted
    CredentialUpdated { accepted: bool },
}

/// Waiting-list state machine
#[derive(Debug, Default)]
pub struct Reconciler {
    waiting: Mutex<HashMap<String, Credential>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `name` given whether a provisioning record exists
    pub fn state_of(&self, name: &str, provisioned: bool) -> RegistrationState {
        if provisioned {
            RegistrationState::Provisioned
        } else if self.waiting.lock().contains_key(name) {
            RegistrationState::Waiting
        } else {
            RegistrationState::Unknown
        }
    }

    /// Handle a device registering itself.
    ///
    /// Unprovisioned names are parked (a later submission overwrites an
    /// earlier one); provisioned names go through the credential update
    /// policy.
    pub fn self_register(
        &self,
        name: &str,
        credential: Credential,
        provisioned: bool,
        credentials: &mut CredentialStore,
    ) -> Result<SelfRegistration> {
        if provisioned {
            let accepted = credentials.update(name, credential)?;
            if !accepted {
                info!("Kept existing credential for {}: username mismatch", name);
            }
            return Ok(SelfRegistration::CredentialUpdated { accepted });
        }

        let replaced = self
            .waiting
            .lock()
            .insert(name.to_string(), credential)
            .is_some();
        info!("Queued self-registration for unprovisioned client {}", name);
        Ok(SelfRegistration::Queued { replaced })
    }

    /// Handle `name` becoming provisioned: move a parked registration, if
    /// any, into the credential store. Returns whether one was adopted.
    pub fn provisioned(&self, name: &str, credentials: &mut CredentialStore) -> Result<bool> {
        let Some(credential) = self.waiting.lock().remove(name) else {
            return Ok(false);
        };

        match credentials.add(name, credential.clone()) {
            Ok(added) => {
                if added {
                    info!("Adopted waiting registration for {}", name);
                } else {
                    debug!("Credential for {} already present, waiting entry dropped", name);
                }
                Ok(added)
            }
            Err(e) => {
                // Put it back so a retry can still adopt it
                self.waiting.lock().entry(name.to_string()).or_insert(credential);
                Err(e)
            }
        }
    }

    /// Drop a parked registration; returns whether one existed
    pub fn discard(&self, name: &str) -> bool {
        self.waiting.lock().remove(name).is_some()
    }

    #[cfg(test)]
    fn waiting(&self, name: &str) -> Option<Credential> {
        self.waiting.lock().get(name).cloned()
    }

    /// Names currently parked, sorted
    pub fn waiting_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.waiting.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
