//! Cross-process registry lock
//!
//! Every process that mutates the on-disk registry state (client configs,
//! credential document, key store) takes an exclusive `flock` on one lock
//! file first. The lock belongs to the open file description, so two
//! registries in the same process exclude each other as well.

use crate::{Error, Result};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Advisory lock file shared by every registry over one OpenVPN root
#[derive(Debug, Clone)]
pub struct RegistryLock {
    path: PathBuf,
}

/// Held lock; released on drop
pub struct LockGuard {
    _file: Flock<File>,
}

impl RegistryLock {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Wait for exclusive access
    pub async fn exclusive(&self) -> Result<LockGuard> {
        self.acquire(FlockArg::LockExclusive).await
    }

    /// Wait for shared (read) access
    pub async fn shared(&self) -> Result<LockGuard> {
        self.acquire(FlockArg::LockShared).await
    }

    async fn acquire(&self, arg: FlockArg) -> Result<LockGuard> {
        let path = self.path.clone();

        let guard = tokio::task::spawn_blocking(move || -> Result<LockGuard> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;

            let file = Flock::lock(file, arg).map_err(|(_, errno)| Error::Io(errno.into()))?;
            Ok(LockGuard { _file: file })
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        trace!("Acquired registry lock {:?}", self.path);
        Ok(guard)
    }
}
