//! Provisioning record storage
//!
//! One file per client in the VPN daemon's client-config directory. The
//! daemon reads the same files to push each client its fixed address, so the
//! layout is a single `ifconfig-push <address> <netmask>` line.

use crate::types::ProvisioningRecord;
use crate::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Directory-backed set of provisioning records
#[derive(Debug, Clone)]
pub struct ProvisioningStore {
    dir: PathBuf,
}

impl ProvisioningStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Whether a record exists for `name`
    pub async fn exists(&self, name: &str) -> bool {
        fs::metadata(self.record_path(name))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Read one record; a missing file is `None`, an unreadable layout is `None` with a warning
    pub async fn get(&self, name: &str) -> Result<Option<ProvisioningRecord>> {
        let path = self.record_path(name);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = ProvisioningRecord::from_config_line(name, &content);
        if record.is_none() {
            warn!("Ignoring malformed client config {:?}", path);
        }
        Ok(record)
    }

    /// All well-formed records, sorted by name.
    ///
    /// Malformed files are skipped so one bad entry never hides the rest.
    pub async fn list(&self) -> Result<Vec<ProvisioningRecord>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Temp files from an in-progress write
            if name.starts_with('.') {
                continue;
            }

            match fs::read_to_string(entry.path()).await {
                Ok(content) => match ProvisioningRecord::from_config_line(&name, &content) {
                    Some(record) => records.push(record),
                    None => warn!("Ignoring malformed client config {:?}", entry.path()),
                },
                Err(e) => warn!("Failed to read client config {:?}: {}", entry.path(), e),
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Durably write a record (temp file + rename)
    pub async fn write(&self, record: &ProvisioningRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(&record.name);
        let tmp_path = self.dir.join(format!(".{}.tmp", record.name));
        fs::write(&tmp_path, record.to_config_line()).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!("Wrote client config {:?}", path);
        Ok(())
    }

    /// Delete a record; returns whether one existed
    pub async fn remove(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.record_path(name)).await {
            Ok(()) => {
                debug!("Removed client config for {}", name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
