//! Service socket setup

use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::net::UnixListener;
use tracing::{debug, warn};

/// Owner and group only; the socket hands out device credentials
const SOCKET_MODE: u32 = 0o660;

/// Bind the service socket, replacing a stale one left by a previous run
pub fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    if path.exists() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            anyhow::bail!("{} is in use by another fleetregd", path.display());
        }
        warn!("Removing stale socket {}", path.display());
        std::fs::remove_file(path)?;
    }

    let listener =
        UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    debug!("Listening on {}", path.display());

    Ok(listener)
}

/// Remove the socket on shutdown
pub fn cleanup(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
