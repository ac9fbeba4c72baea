//! Persisted device credentials
//!
//! The whole name → credential mapping lives in one JSON document that is
//! rewritten atomically after every mutation. The store does no locking of
//! its own; the fleet registry owns it behind its write lock so a
//! mutate-then-flush sequence can never lose a concurrent update.

use crate::types::Credential;
use crate::Result;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn read_entries(path: &Path) -> Result<BTreeMap<String, Credential>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        Ok(BTreeMap::new())
    } else {
        Ok(serde_json::from_str(&content)?)
    }
}

/// Name → credential mapping with load-on-start / flush-on-write semantics
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    entries: BTreeMap<String, Credential>,
}

impl CredentialStore {
    /// Load the mapping from `path`; a missing file is an empty store
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path)?;
        info!("Loaded {} credential(s) from {:?}", entries.len(), path);

        Ok(Self { path, entries })
    }

    /// Re-read the document, dropping the in-memory copy.
    ///
    /// Callers hold the registry lock, so another process may have
    /// rewritten the file since the last load.
    pub fn reload(&mut self) -> Result<()> {
        self.entries = read_entries(&self.path)?;
        debug!("Reloaded {} credential(s) from {:?}", self.entries.len(), self.path);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Credential> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Conditional upsert.
    ///
    /// Accepted when `name` has no credential yet or the stored username
    /// matches `credential.username`. A rejected update leaves the store
    /// untouched and returns `false`.
    pub fn update(&mut self, name: &str, credential: Credential) -> Result<bool> {
        if let Some(existing) = self.entries.get(name) {
            if existing.username != credential.username {
                debug!(
                    "Rejected credential update for {}: username mismatch",
                    name
                );
                return Ok(false);
            }
        }

        self.put(name, credential)?;
        debug!("Updated credential for {}", name);
        Ok(true)
    }

    /// Strict insert; returns `false` without touching anything if `name` exists
    pub fn add(&mut self, name: &str, credential: Credential) -> Result<bool> {
        if self.entries.contains_key(name) {
            debug!("Credential for {} already present, not adding", name);
            return Ok(false);
        }

        self.put(name, credential)?;
        debug!("Added credential for {}", name);
        Ok(true)
    }

    /// Explicit administrative removal
    pub fn remove(&mut self, name: &str) -> Result<Option<Credential>> {
        let Some(previous) = self.entries.remove(name) else {
            return Ok(None);
        };

        if let Err(e) = self.flush() {
            self.entries.insert(name.to_string(), previous);
            return Err(e);
        }

        info!("Removed credential for {}", name);
        Ok(Some(previous))
    }

    /// Insert and flush, restoring the previous value if the flush fails
    fn put(&mut self, name: &str, credential: Credential) -> Result<()> {
        let previous = self.entries.insert(name.to_string(), credential);

        if let Err(e) = self.flush() {
            match previous {
                Some(old) => self.entries.insert(name.to_string(), old),
                None => self.entries.remove(name),
            };
            return Err(e);
        }

        Ok(())
    }

    /// Rewrite the full mapping via a temp file in the same directory
    fn flush(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let data = serde_json::to_vec(&self.entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!("Flushed {} credential(s) to {:?}", self.entries.len(), self.path);
        Ok(())
    }
}
