//! Advisory lock so two mutating commands (setup, start, stop, uninstall,
//! restore) never run at once.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::config;

pub const LOCK_FILE_NAME: &str = "warp-nextdns.lock";

/// Default lock location inside the application directory.
pub fn default_lock_path() -> PathBuf {
    config::app_dir().join(LOCK_FILE_NAME)
}

/// Holds the lock until dropped.
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn acquire() -> Result<Self> {
        Self::acquire_at(&default_lock_path())
    }

    /// Open (without truncating) and lock `path`. Fails immediately if
    /// another process holds it.
    pub fn acquire_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {:?}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .context("Failed to set lock file permissions")?;
        }

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another warp-nextdns command is already running.\n\
                 If that is not the case, remove the lock file: {}",
                path.display()
            )
        })?;

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
